// THEORY:
// The `CaptureLoop` is the one long-lived worker of a monitoring session. It runs
// on tokio's blocking pool because camera reads block, and it is the only writer of
// the shared frame buffer and the alert log.
//
// Each cycle, in this order:
// 1.  Read a frame. A failed read backs off and retries without touching the
//     detector, so a flaky camera never produces phantom motion.
// 2.  Publish the raw frame for streaming. This happens for every frame that was
//     read, paused or not, and before any motion evaluation.
// 3.  Paused: drop the motion baseline and idle. The first cycle after resuming is
//     a calibration cycle.
// 4.  Detect, then ask the throttle. A trigger turns the annotated frame into an
//     `Alert` that is logged for pollers and handed to the dispatcher.
//
// The loop ends when `active` is cleared (by `stop` or by a failed open), and the
// device is released on the way out no matter how the session ended.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::{CaptureConfig, DetectorConfig};
use crate::core_modules::alert_log::{Alert, AlertLog};
use crate::core_modules::alert_throttle::{AlertThrottle, AlertTrigger};
use crate::core_modules::frame_source::FrameSource;
use crate::core_modules::motion_detector::{MotionDetector, MotionEvent};
use crate::core_modules::shared_frame_buffer::SharedFrameBuffer;
use crate::dispatcher::{Notification, NotificationDispatcher};
use crate::monitor::MonitoringState;

/// What a single cycle did. Drives the pacing of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    ReadFailed,
    Paused,
    Calibrated,
    Observed { score: u8 },
    Alerted { score: u8 },
}

pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    state: Arc<MonitoringState>,
    frames: Arc<SharedFrameBuffer>,
    alerts: Arc<AlertLog>,
    dispatcher: NotificationDispatcher,
    detector: MotionDetector,
    throttle: AlertThrottle,
    config: CaptureConfig,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        state: Arc<MonitoringState>,
        frames: Arc<SharedFrameBuffer>,
        alerts: Arc<AlertLog>,
        dispatcher: NotificationDispatcher,
        detector: DetectorConfig,
        config: CaptureConfig,
    ) -> Self {
        Self {
            source,
            state,
            frames,
            alerts,
            dispatcher,
            detector: MotionDetector::new(detector),
            throttle: AlertThrottle::new(config.alert_cooldown),
            config,
        }
    }

    /// Runs the session to completion. Blocks the calling thread.
    pub fn run(mut self) {
        let device = self.source.describe();
        if let Err(e) = self.source.open() {
            error!(%device, "{e}");
            self.state.device_failed(e.to_string());
            self.source.release();
            return;
        }
        self.state.device_opened();
        info!(%device, "capture worker running");

        let mut cycles: u64 = 0;
        while self.state.is_active() {
            let pause = match self.cycle() {
                CycleOutcome::ReadFailed => self.config.read_retry_backoff,
                CycleOutcome::Paused => self.config.pause_poll,
                CycleOutcome::Calibrated => self.config.calibration_pause,
                CycleOutcome::Observed { .. } | CycleOutcome::Alerted { .. } => Duration::ZERO,
            };
            if !pause.is_zero() {
                std::thread::sleep(pause);
            }
            cycles += 1;
        }

        self.source.release();
        info!(%device, cycles, "capture worker stopped, device released");
    }

    pub(crate) fn cycle(&mut self) -> CycleOutcome {
        let frame = match self.source.read() {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!("{e}");
                return CycleOutcome::ReadFailed;
            }
        };
        self.frames.publish(Arc::clone(&frame));

        if self.state.is_paused() {
            self.detector.reset();
            return CycleOutcome::Paused;
        }

        let Some(event) = self.detector.process(&frame) else {
            debug!(sequence = frame.sequence, "motion baseline acquired");
            return CycleOutcome::Calibrated;
        };
        let score = event.normalized_score;
        debug!(
            sequence = frame.sequence,
            score,
            detected = event.detected,
            area = event.max_contour_area,
            "motion evaluated"
        );

        match self.throttle.evaluate(&event, self.state.threshold(), Instant::now()) {
            Some(trigger) if self.raise_alert(&event, trigger) => CycleOutcome::Alerted { score },
            _ => CycleOutcome::Observed { score },
        }
    }

    /// Builds the alert for `trigger`. Returns false when the snapshot could not be encoded.
    fn raise_alert(&self, event: &MotionEvent, trigger: AlertTrigger) -> bool {
        let image = match event.annotated_frame.to_jpeg_data_url() {
            Ok(image) => image,
            Err(e) => {
                error!(score = trigger.score, "alert skipped: {e}");
                return false;
            }
        };
        let alert = Alert {
            image,
            score: trigger.score,
            timestamp: Utc::now().timestamp_millis(),
        };
        info!(score = alert.score, timestamp = alert.timestamp, "motion alert raised");

        self.alerts.append(alert.clone());
        if let Err(e) = self.dispatcher.submit(Notification::Alert(alert)) {
            warn!("{e}");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Threshold;
    use crate::core_modules::frame::Frame;
    use crate::error::DeviceError;
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    enum Step {
        Black,
        Square(u32),
        Fail,
    }

    /// Plays a fixed script, then ends the session.
    struct Scripted {
        steps: VecDeque<Step>,
        state: Arc<MonitoringState>,
        sequence: u64,
        opens: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl FrameSource for Scripted {
        fn open(&mut self) -> Result<(), DeviceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read(&mut self) -> Result<Frame, DeviceError> {
            let mut image = RgbImage::new(200, 200);
            match self.steps.pop_front() {
                Some(Step::Black) => {}
                Some(Step::Square(x0)) => {
                    for y in 50..150 {
                        for x in x0..x0 + 60 {
                            image.put_pixel(x, y, Rgb([255, 255, 255]));
                        }
                    }
                }
                Some(Step::Fail) => return Err(DeviceError::ReadFailed("usb hiccup".to_string())),
                None => {
                    self.state.deactivate();
                    return Err(DeviceError::ReadFailed("script finished".to_string()));
                }
            }
            self.sequence += 1;
            Ok(Frame::new(self.sequence, image))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    struct Harness {
        capture: CaptureLoop,
        state: Arc<MonitoringState>,
        frames: Arc<SharedFrameBuffer>,
        alerts: Arc<AlertLog>,
        notifications: mpsc::Receiver<Notification>,
        opens: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    fn harness(steps: Vec<Step>) -> Harness {
        let state = Arc::new(MonitoringState::new(Threshold::default()));
        state.activate();
        let frames = Arc::new(SharedFrameBuffer::new());
        let alerts = Arc::new(AlertLog::new(16));
        let (dispatcher, notifications) = NotificationDispatcher::channel(16);
        let opens = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));
        let source = Scripted {
            steps: steps.into(),
            state: Arc::clone(&state),
            sequence: 0,
            opens: Arc::clone(&opens),
            releases: Arc::clone(&releases),
        };
        let config = CaptureConfig {
            read_retry_backoff: Duration::ZERO,
            pause_poll: Duration::ZERO,
            calibration_pause: Duration::ZERO,
            ..CaptureConfig::default()
        };
        let capture = CaptureLoop::new(
            Box::new(source),
            Arc::clone(&state),
            Arc::clone(&frames),
            Arc::clone(&alerts),
            dispatcher,
            DetectorConfig::default(),
            config,
        );
        Harness {
            capture,
            state,
            frames,
            alerts,
            notifications,
            opens,
            releases,
        }
    }

    #[test]
    fn first_frame_calibrates_then_motion_alerts_once() {
        let mut h = harness(vec![Step::Black, Step::Square(20), Step::Square(120)]);

        assert_eq!(h.capture.cycle(), CycleOutcome::Calibrated);
        let CycleOutcome::Alerted { score } = h.capture.cycle() else {
            panic!("expected an alert");
        };
        assert!(score >= 10);
        // still inside the cooldown window
        assert!(matches!(h.capture.cycle(), CycleOutcome::Observed { score } if score > 0));

        let alerts = h.alerts.drain();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].score, score);
        assert!(alerts[0].image.starts_with("data:image/jpeg;base64,"));
        assert!(alerts[0].timestamp > 0);

        assert!(matches!(h.notifications.try_recv(), Ok(Notification::Alert(ref a)) if a.score == score));
        assert!(h.notifications.try_recv().is_err());
    }

    #[test]
    fn scores_below_the_threshold_do_not_alert() {
        let mut h = harness(vec![Step::Black, Step::Square(20)]);
        h.state.set_threshold(Threshold::new(100).unwrap());
        h.capture.cycle();
        assert!(matches!(h.capture.cycle(), CycleOutcome::Observed { .. }));
        assert!(h.alerts.is_empty());
    }

    #[test]
    fn read_failures_leave_the_baseline_alone() {
        let mut h = harness(vec![Step::Black, Step::Fail, Step::Black]);
        assert_eq!(h.capture.cycle(), CycleOutcome::Calibrated);
        assert_eq!(h.capture.cycle(), CycleOutcome::ReadFailed);
        assert_eq!(h.frames.snapshot().unwrap().sequence, 1);
        assert_eq!(h.capture.cycle(), CycleOutcome::Observed { score: 0 });
    }

    #[test]
    fn paused_cycles_publish_frames_and_resume_recalibrates() {
        let mut h = harness(vec![Step::Black, Step::Black, Step::Square(20), Step::Square(120)]);
        assert_eq!(h.capture.cycle(), CycleOutcome::Calibrated);

        h.state.set_paused(true).unwrap();
        assert_eq!(h.capture.cycle(), CycleOutcome::Paused);
        assert_eq!(h.frames.snapshot().unwrap().sequence, 2);

        h.state.set_paused(false).unwrap();
        // the scene changed while paused, but the first cycle back only calibrates
        assert_eq!(h.capture.cycle(), CycleOutcome::Calibrated);
        assert!(matches!(h.capture.cycle(), CycleOutcome::Alerted { .. }));
    }

    #[test]
    fn every_read_frame_is_published_before_evaluation() {
        let mut h = harness(vec![Step::Black, Step::Square(20)]);
        h.capture.cycle();
        h.capture.cycle();
        let latest = h.frames.snapshot().unwrap();
        assert_eq!(latest.sequence, 2);
        // the published frame is the raw capture, without annotations
        assert!(latest.image.pixels().all(|p| *p != Rgb([0, 255, 0])));
    }

    #[test]
    fn run_releases_the_device_exactly_once() {
        let h = harness(vec![Step::Black, Step::Fail, Step::Square(20), Step::Black]);
        let (opens, releases, state, alerts) = (h.opens, h.releases, h.state, h.alerts);
        h.capture.run();

        assert!(!state.is_active());
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(alerts.len(), 1);
    }
}
