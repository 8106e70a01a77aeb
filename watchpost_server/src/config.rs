use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use watchpost::SourceSpec;

/// The first camera, or the synthetic pattern in builds without the `camera` feature.
#[cfg(feature = "camera")]
const DEFAULT_SOURCE: &str = "camera:0";
#[cfg(not(feature = "camera"))]
const DEFAULT_SOURCE: &str = "pattern:640x480";

/// Command line and environment configuration of the standalone server.
#[derive(Parser, Debug, Clone)]
#[command(name = "watchpost", version, about = "Single-camera motion monitoring server")]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    #[arg(long, env = "WATCHPOST_BIND", default_value = "0.0.0.0:5000")]
    pub bind: String,

    /// Frame source: `camera:<index>`, `file:<video>`, `dir:<image folder>` or `pattern:<W>x<H>`.
    /// `camera:` and `file:` need a build with the `camera` feature.
    #[arg(long, env = "WATCHPOST_SOURCE", default_value = DEFAULT_SOURCE)]
    pub source: SourceSpec,

    /// JSON file holding the alert threshold, recovery email and SMTP settings.
    #[arg(long, env = "WATCHPOST_SETTINGS", default_value = "config.json")]
    pub settings: PathBuf,

    /// Start monitoring right away instead of waiting for `/start_monitoring`.
    #[arg(long, env = "WATCHPOST_AUTOSTART")]
    pub autostart: bool,

    /// How often an MJPEG viewer checks for a new frame, in milliseconds.
    #[arg(long, env = "WATCHPOST_STREAM_POLL_MS", default_value_t = 10)]
    pub stream_poll_ms: u64,
}

impl ServerConfig {
    pub fn stream_poll(&self) -> Duration {
        Duration::from_millis(self.stream_poll_ms.max(1))
    }
}
