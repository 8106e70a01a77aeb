// THEORY:
// The `Monitor` is the explicit context object shared by every request handler. It
// owns all cross-thread state and the lifecycle of the single capture worker.
//
// Lifecycle:
//
//     Stopped --start--> Running <--pause/resume--> Running+Paused
//        ^                  |                              |
//        +------stop--------+-------------stop-------------+
//
// 1.  **Flags** (`active`, `paused`, device status) live behind one mutex so the
//     "paused is cleared whenever active changes" invariant is a single write.
// 2.  **Threshold** is an atomic: the worker reads it every cycle and it may be
//     changed at any moment without touching the flags lock.
// 3.  **Worker handle** sits in an async mutex. `start` and `stop` both hold it for
//     their whole duration, so concurrent commands serialize, and `stop` awaits the
//     worker until the device is released. The handle leaves its slot only after
//     the join completes, so a cancelled `stop` still leaves the next `start` to wait
//     out a device that is being let go.
// 4.  A failed device open is reported by the worker itself: it flips `active` off
//     and records why, which `/status` and the stream endpoint surface.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::capture_loop::CaptureLoop;
use crate::config::{CaptureConfig, DetectorConfig, Threshold};
use crate::core_modules::alert_log::AlertLog;
use crate::core_modules::frame_source::SourceFactory;
use crate::core_modules::shared_frame_buffer::SharedFrameBuffer;
use crate::dispatcher::NotificationDispatcher;

/// Outcome of the most recent attempt to open the video device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DeviceStatus {
    Unknown,
    Ok,
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Stopped,
    Running,
    Paused,
}

#[derive(Debug)]
struct Flags {
    active: bool,
    paused: bool,
    device: DeviceStatus,
}

/// Lifecycle flags and the live alert threshold.
#[derive(Debug)]
pub struct MonitoringState {
    flags: Mutex<Flags>,
    threshold: AtomicU8,
}

impl MonitoringState {
    pub fn new(threshold: Threshold) -> Self {
        Self {
            flags: Mutex::new(Flags {
                active: false,
                paused: false,
                device: DeviceStatus::Unknown,
            }),
            threshold: AtomicU8::new(threshold.get()),
        }
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.flags().active
    }

    pub fn is_paused(&self) -> bool {
        self.flags().paused
    }

    pub fn lifecycle(&self) -> Lifecycle {
        let flags = self.flags();
        match (flags.active, flags.paused) {
            (false, _) => Lifecycle::Stopped,
            (true, false) => Lifecycle::Running,
            (true, true) => Lifecycle::Paused,
        }
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.flags().device.clone()
    }

    pub fn threshold(&self) -> u8 {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: Threshold) {
        self.threshold.store(threshold.get(), Ordering::Relaxed);
    }

    /// Stopped -> Running. Returns false when already active.
    pub(crate) fn activate(&self) -> bool {
        let mut flags = self.flags();
        if flags.active {
            return false;
        }
        flags.active = true;
        flags.paused = false;
        flags.device = DeviceStatus::Unknown;
        true
    }

    /// Any -> Stopped. Returns whether monitoring was active.
    pub(crate) fn deactivate(&self) -> bool {
        let mut flags = self.flags();
        let was_active = flags.active;
        flags.active = false;
        flags.paused = false;
        was_active
    }

    /// Sets the pause flag. Only allowed while active; returns whether the flag changed.
    pub(crate) fn set_paused(&self, paused: bool) -> Result<bool, NotRunning> {
        let mut flags = self.flags();
        if !flags.active {
            return Err(NotRunning);
        }
        let changed = flags.paused != paused;
        flags.paused = paused;
        Ok(changed)
    }

    pub(crate) fn device_opened(&self) {
        self.flags().device = DeviceStatus::Ok;
    }

    /// Records a fatal open failure and ends the session.
    pub(crate) fn device_failed(&self, reason: String) {
        let mut flags = self.flags();
        flags.device = DeviceStatus::Unavailable(reason);
        flags.active = false;
        flags.paused = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NotRunning;

/// Result of a lifecycle command. Commands never fail; redundant ones report the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Paused,
    AlreadyPaused,
    Resumed,
    NotPaused,
    NotRunning,
}

impl CommandOutcome {
    pub fn message(self) -> &'static str {
        match self {
            CommandOutcome::Started => "Monitoring started",
            CommandOutcome::AlreadyRunning => "Monitoring is already active",
            CommandOutcome::Stopped => "Monitoring stopped",
            CommandOutcome::AlreadyStopped => "Monitoring is not active",
            CommandOutcome::Paused => "Processing paused",
            CommandOutcome::AlreadyPaused => "Processing is already paused",
            CommandOutcome::Resumed => "Processing resumed",
            CommandOutcome::NotPaused => "Processing is not paused",
            CommandOutcome::NotRunning => "Monitoring is not active, nothing to pause or resume",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub state: Lifecycle,
    pub active: bool,
    pub paused: bool,
    pub threshold: u8,
    pub device: DeviceStatus,
    pub pending_alerts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub detector: DetectorConfig,
    pub capture: CaptureConfig,
}

pub struct Monitor {
    state: Arc<MonitoringState>,
    frames: Arc<SharedFrameBuffer>,
    alerts: Arc<AlertLog>,
    dispatcher: NotificationDispatcher,
    factory: SourceFactory,
    config: MonitorConfig,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(
        factory: SourceFactory,
        dispatcher: NotificationDispatcher,
        threshold: Threshold,
        config: MonitorConfig,
    ) -> Self {
        Self {
            state: Arc::new(MonitoringState::new(threshold)),
            frames: Arc::new(SharedFrameBuffer::new()),
            alerts: Arc::new(AlertLog::new(config.capture.alert_log_capacity)),
            dispatcher,
            factory,
            config,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> &MonitoringState {
        &self.state
    }

    pub fn frames(&self) -> &SharedFrameBuffer {
        &self.frames
    }

    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn set_threshold(&self, threshold: Threshold) {
        self.state.set_threshold(threshold);
        info!(%threshold, "alert threshold updated");
    }

    pub async fn start(&self) -> CommandOutcome {
        let mut worker = self.worker.lock().await;
        if self.state.is_active() {
            return CommandOutcome::AlreadyRunning;
        }
        // A session that ended on its own, or whose `stop` was cancelled, may still be releasing.
        join_worker(&mut worker).await;

        self.frames.clear();
        self.state.activate();
        let capture = CaptureLoop::new(
            (self.factory)(),
            Arc::clone(&self.state),
            Arc::clone(&self.frames),
            Arc::clone(&self.alerts),
            self.dispatcher.clone(),
            self.config.detector.clone(),
            self.config.capture.clone(),
        );
        *worker = Some(tokio::task::spawn_blocking(move || capture.run()));
        info!("monitoring started");
        CommandOutcome::Started
    }

    /// Stops monitoring and waits until the capture worker has released the device.
    pub async fn stop(&self) -> CommandOutcome {
        let mut worker = self.worker.lock().await;
        let was_active = self.state.deactivate();
        join_worker(&mut worker).await;
        if was_active {
            info!("monitoring stopped");
            CommandOutcome::Stopped
        } else {
            CommandOutcome::AlreadyStopped
        }
    }

    pub fn pause(&self) -> CommandOutcome {
        match self.state.set_paused(true) {
            Ok(true) => {
                info!("processing paused");
                CommandOutcome::Paused
            }
            Ok(false) => CommandOutcome::AlreadyPaused,
            Err(NotRunning) => CommandOutcome::NotRunning,
        }
    }

    pub fn resume(&self) -> CommandOutcome {
        match self.state.set_paused(false) {
            Ok(true) => {
                info!("processing resumed");
                CommandOutcome::Resumed
            }
            Ok(false) => CommandOutcome::NotPaused,
            Err(NotRunning) => CommandOutcome::NotRunning,
        }
    }

    pub fn status(&self) -> StatusReport {
        let state = self.state.lifecycle();
        StatusReport {
            state,
            active: state != Lifecycle::Stopped,
            paused: state == Lifecycle::Paused,
            threshold: self.state.threshold(),
            device: self.state.device_status(),
            pending_alerts: self.alerts.len(),
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        // The worker owns clones of the shared state and runs until `active` is cleared.
        self.state.deactivate();
    }
}

/// Awaits the worker in its slot and only then empties the slot. If the caller is
/// cancelled midway the handle stays put, and the next command waits on it again.
async fn join_worker(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.as_mut() {
        if let Err(e) = handle.await {
            error!("capture worker terminated abnormally: {e}");
        }
    }
    *slot = None;
}
