use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The alert threshold used until an operator changes it.
pub const DEFAULT_ALERT_THRESHOLD: u8 = 10;

/// A motion-score threshold, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Threshold(u8);

impl Threshold {
    pub const MAX: u8 = 100;

    pub fn new(value: i64) -> Result<Self, ConfigError> {
        if (0..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ConfigError::ThresholdOutOfRange(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_ALERT_THRESHOLD)
    }
}

impl TryFrom<i64> for Threshold {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Threshold> for u8 {
    fn from(value: Threshold) -> Self {
        value.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Calibration knobs for the `MotionDetector`.
///
/// The defaults were tuned empirically against a 640x480 webcam and must be kept
/// as-is for scores to stay comparable between installations.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Side length of the square Gaussian kernel used to suppress sensor noise. Must be odd.
    pub blur_kernel_size: u32,
    /// Minimum absolute grayscale difference for a pixel to count as changed.
    pub diff_threshold: u8,
    /// Number of 3x3 dilation passes applied to the change mask.
    pub dilate_iterations: u32,
    /// Contours with a smaller area (px²) are treated as noise.
    pub min_contour_area: f64,
    /// Contour area (px²) that maps to a score of 100.
    pub score_ceiling: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: 21,
            diff_threshold: 25,
            dilate_iterations: 2,
            min_contour_area: 500.0,
            score_ceiling: 50_000.0,
        }
    }
}

/// Pacing and sizing of the capture worker and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Back-off after a failed frame read.
    pub read_retry_backoff: Duration,
    /// Sleep per cycle while processing is paused.
    pub pause_poll: Duration,
    /// Sleep after a cycle that only (re)acquired the motion baseline.
    pub calibration_pause: Duration,
    /// Minimum time between two alerts.
    pub alert_cooldown: Duration,
    /// Pending alerts kept for the polling client before the oldest are dropped.
    pub alert_log_capacity: usize,
    /// Notifications queued for delivery before new ones are rejected.
    pub dispatch_queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            read_retry_backoff: Duration::from_millis(100),
            pause_poll: Duration::from_millis(50),
            calibration_pause: Duration::from_millis(50),
            alert_cooldown: Duration::from_secs(5),
            alert_log_capacity: 100,
            dispatch_queue_capacity: 32,
        }
    }
}
