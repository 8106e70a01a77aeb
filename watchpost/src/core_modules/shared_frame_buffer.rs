use std::sync::{Arc, Mutex, PoisonError};

use crate::core_modules::frame::Frame;

/// Holds the single most recent frame for streaming consumers.
///
/// Publishing swaps an `Arc`, so the lock is held for a pointer write and readers
/// walk away with their own handle to a complete frame.
#[derive(Debug, Default)]
pub struct SharedFrameBuffer {
    latest: Mutex<Option<Arc<Frame>>>,
}

impl SharedFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Arc<Frame>) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
