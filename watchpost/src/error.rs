// THEORY:
// Every failure the monitoring engine can produce falls into one of four families,
// and each family has exactly one propagation policy:
//
// 1.  `DeviceError`: the camera. Failing to open ends the session; failing to read
//     a single frame is transient and retried by the capture loop.
// 2.  `ConfigError`: bad input at the boundary (threshold, settings file). Rejected
//     before any state changes.
// 3.  `DispatchError`: notification hand-off. Logged and dropped, never surfaced to
//     whoever raised the alert.
// 4.  `EncodeError`: a frame could not be turned into a JPEG. The affected alert or
//     stream chunk is skipped.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a `FrameSource`.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device could not be opened. Fatal for the current monitoring session.
    #[error("could not open video device `{device}`: {reason}")]
    Open { device: String, reason: String },
    /// A single frame could not be read. The caller backs off and retries.
    #[error("failed to read a frame: {0}")]
    ReadFailed(String),
}

impl DeviceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::Open { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("threshold must be between 0 and 100, got {0}")]
    ThresholdOutOfRange(i64),
    #[error("threshold must be an integer")]
    ThresholdNotInteger,
    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
    #[error("invalid frame source `{spec}`: {reason}")]
    InvalidSource { spec: String, reason: String },
    #[error("settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("settings file {} is not valid: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// True when the error was caused by the caller's input rather than by storage.
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, ConfigError::Io { .. } | ConfigError::Parse { .. })
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification queue is full, dropped {0} notification")]
    QueueFull(&'static str),
    #[error("notification queue is closed")]
    QueueClosed,
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not encode frame as JPEG: {0}")]
    Jpeg(#[from] image::ImageError),
}
