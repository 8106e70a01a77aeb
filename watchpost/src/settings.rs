// THEORY:
// The `SettingsStore` is the persisted side of configuration: the alert threshold
// plus the recovery and SMTP settings the notification transport needs. It is a
// small typed document stored as JSON.
//
// Every mutation goes through `update`, which works on a copy:
// 1.  apply the caller's change to a clone of the current settings,
// 2.  validate the whole document,
// 3.  write it to disk,
// 4.  only then swap it in.
// A rejected or unwritable change leaves both memory and disk untouched. Writers
// are serialized among themselves; readers never wait on the disk.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{DEFAULT_ALERT_THRESHOLD, Threshold};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl SmtpSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("smtp.server", &self.server),
            ("smtp.user", &self.user),
            ("smtp.password", &self.password),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidSetting {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "smtp.port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub alert_threshold: u8,
    pub recovery_email: Option<String>,
    pub smtp: Option<SmtpSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            recovery_email: None,
            smtp: None,
        }
    }
}

impl Settings {
    pub fn threshold(&self) -> Threshold {
        Threshold::new(self.alert_threshold as i64).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Threshold::new(self.alert_threshold as i64)?;
        if let Some(email) = &self.recovery_email {
            validate_email(email)?;
        }
        if let Some(smtp) = &self.smtp {
            smtp.validate()?;
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidSetting {
        field: "recovery_email",
        reason: reason.to_string(),
    };
    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| invalid("must be an email address"))?;
    if local.is_empty() || domain.is_empty() || email.chars().any(char::is_whitespace) {
        return Err(invalid("must be an email address"));
    }
    Ok(())
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    current: Mutex<Settings>,
    /// Serializes writers. Held across the disk write; `current` is not.
    writer: Mutex<()>,
}

impl SettingsStore {
    /// A store that only lives in memory.
    pub fn in_memory(settings: Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            path: None,
            current: Mutex::new(settings),
            writer: Mutex::new(()),
        })
    }

    /// Loads settings from `path`, starting from defaults when the file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<Settings>(&text).map_err(|source| {
                ConfigError::Parse {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "settings file not found, using defaults");
                Settings::default()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        settings.validate()?;
        info!(path = %path.display(), threshold = settings.alert_threshold, "settings loaded");
        Ok(Self {
            path: Some(path),
            current: Mutex::new(settings),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> Settings {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Applies `change` if the result validates and persists. Returns the new settings.
    ///
    /// Blocks on file I/O; async callers run it on the blocking pool.
    pub fn update<F>(&self, change: F) -> Result<Settings, ConfigError>
    where
        F: FnOnce(&mut Settings),
    {
        self.update_then(change, |_| {})
    }

    /// Like `update`, and calls `committed` with the new settings before the next
    /// writer can start. Values mirrored elsewhere stay in step with the file.
    pub fn update_then<F, C>(&self, change: F, committed: C) -> Result<Settings, ConfigError>
    where
        F: FnOnce(&mut Settings),
        C: FnOnce(&Settings),
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.get();
        change(&mut next);
        next.validate()?;
        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = next.clone();
        committed(&next);
        Ok(next)
    }

    pub fn set_threshold(&self, threshold: Threshold) -> Result<Settings, ConfigError> {
        self.update(|s| s.alert_threshold = threshold.get())
    }

    pub fn set_recovery_email(&self, email: String) -> Result<Settings, ConfigError> {
        self.update(|s| s.recovery_email = Some(email))
    }

    pub fn set_smtp(&self, smtp: SmtpSettings) -> Result<Settings, ConfigError> {
        self.update(|s| s.smtp = Some(smtp))
    }
}

fn persist(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(settings).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    // Write next to the target and rename so a crash never leaves half a file behind.
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, json).map_err(io_error)?;
    std::fs::rename(&staging, path).map_err(io_error)?;
    Ok(())
}
