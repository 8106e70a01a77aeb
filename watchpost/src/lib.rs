// THEORY:
// This file is the entry point of the `watchpost` library crate: a single-camera
// motion monitoring engine. It exposes the `Monitor` context and the pieces it is
// assembled from, so that an outer surface (the HTTP server, the offline replay
// tool) only has to pick a frame source and a notifier.
//
// Data flows one way:
//
//     FrameSource -> MotionDetector -> AlertThrottle -> AlertLog + NotificationDispatcher
//          \
//           +--> SharedFrameBuffer -> streaming consumers
//
// The low-level building blocks live in `core_modules`. Everything that crosses a
// thread boundary (lifecycle flags, the latest frame, pending alerts) is owned by
// the `Monitor`.

pub mod capture_loop;
pub mod config;
pub mod core_modules;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod settings;

pub use config::{CaptureConfig, DetectorConfig, Threshold};
pub use core_modules::alert_log::Alert;
pub use core_modules::frame::Frame;
pub use core_modules::frame_source::{FrameSource, SourceFactory, SourceSpec};
pub use dispatcher::{LogNotifier, Notification, NotificationDispatcher, Notifier};
pub use error::{ConfigError, DeviceError, DispatchError, EncodeError};
pub use monitor::{CommandOutcome, DeviceStatus, Lifecycle, Monitor, MonitorConfig, StatusReport};
pub use settings::{Settings, SettingsStore, SmtpSettings};
