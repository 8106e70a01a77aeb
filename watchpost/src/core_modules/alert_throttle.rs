// THEORY:
// The `AlertThrottle` is the gate between "the detector saw something" and "an
// operator gets told about it". It combines two rules:
//
// 1.  **Threshold**: only events that were detected and whose normalized score
//     reaches the live threshold qualify.
// 2.  **Cooldown**: at most one alert per cooldown window. The window is measured
//     on the monotonic clock and must be strictly exceeded.
//
// The caller passes `now` in explicitly. The capture loop hands in
// `Instant::now()`, while tests and the offline replay tool drive the throttle with
// a simulated clock.

use std::time::{Duration, Instant};

use crate::core_modules::motion_detector::MotionEvent;

/// Proof that an alert should be raised for the evaluated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertTrigger {
    pub score: u8,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct AlertThrottle {
    cooldown: Duration,
    last_alert: Option<Instant>,
}

impl AlertThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    pub fn reset(&mut self) {
        self.last_alert = None;
    }

    pub fn evaluate(&mut self, event: &MotionEvent, threshold: u8, now: Instant) -> Option<AlertTrigger> {
        self.evaluate_score(event.detected, event.normalized_score, threshold, now)
    }

    /// The decision rule without a full `MotionEvent`.
    pub fn evaluate_score(
        &mut self,
        detected: bool,
        score: u8,
        threshold: u8,
        now: Instant,
    ) -> Option<AlertTrigger> {
        if !detected || score < threshold {
            return None;
        }
        if let Some(last) = self.last_alert {
            if now.saturating_duration_since(last) <= self.cooldown {
                return None;
            }
        }
        self.last_alert = Some(now);
        Some(AlertTrigger { score, at: now })
    }
}
