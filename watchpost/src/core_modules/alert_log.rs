// THEORY:
// The `AlertLog` is the mailbox between the capture worker and the polling web
// client. The worker appends, the client drains. Draining takes the whole pending
// list and leaves an empty one behind in a single critical section, so with one
// poller every alert is delivered exactly once.
//
// A client that stops polling must not make the process grow without bound, so the
// log keeps a fixed number of pending alerts and discards the oldest first.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A rate-limited motion alert with snapshot evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// `data:image/jpeg;base64,...` of the annotated frame.
    pub image: String,
    /// Normalized motion score, `0..=100`.
    pub score: u8,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug)]
pub struct AlertLog {
    pending: Mutex<VecDeque<Alert>>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn append(&self, alert: Alert) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.len() >= self.capacity {
            if let Some(dropped) = pending.pop_front() {
                warn!(
                    timestamp = dropped.timestamp,
                    capacity = self.capacity,
                    "alert log full, discarding oldest pending alert"
                );
            }
        }
        pending.push_back(alert);
    }

    /// Takes every pending alert, oldest first.
    pub fn drain(&self) -> Vec<Alert> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(timestamp: i64) -> Alert {
        Alert {
            image: "data:image/jpeg;base64,".to_string(),
            score: 42,
            timestamp,
        }
    }

    #[test]
    fn drain_returns_everything_once() {
        let log = AlertLog::new(10);
        log.append(alert(1));
        log.append(alert(2));

        let first = log.drain();
        assert_eq!(first.iter().map(|a| a.timestamp).collect::<Vec<_>>(), vec![1, 2]);
        assert!(log.drain().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn full_log_discards_the_oldest() {
        let log = AlertLog::new(3);
        for t in 0..5 {
            log.append(alert(t));
        }
        assert_eq!(log.len(), 3);
        let kept: Vec<i64> = log.drain().iter().map(|a| a.timestamp).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn alerts_serialize_with_the_wire_field_names() {
        let json = serde_json::to_value(alert(1_700_000_000_000)).unwrap();
        assert_eq!(json["score"], 42);
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert!(json["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn concurrent_appends_are_all_drained_exactly_once() {
        use std::sync::Arc;

        let log = Arc::new(AlertLog::new(1_000));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.append(alert(w * 100 + i));
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        for writer in writers {
            writer.join().unwrap();
            seen.extend(log.drain());
        }
        seen.extend(log.drain());

        let mut stamps: Vec<i64> = seen.iter().map(|a| a.timestamp).collect();
        stamps.sort_unstable();
        stamps.dedup();
        assert_eq!(stamps.len(), 200);
        assert_eq!(seen.len(), 200);
    }
}
