// THEORY:
// The `NotificationDispatcher` decouples "an alert happened" from "someone was
// told". The capture worker must never wait on an SMTP round-trip, so hand-off is
// a non-blocking push into a bounded queue, and a single delivery task drains it.
//
// Guarantees:
// 1.  `submit` never blocks. A full or closed queue is reported to the caller, who
//     logs it and moves on.
// 2.  Each notification gets at most one delivery attempt. Failures are logged.
// 3.  Delivery runs on the blocking pool because real transports (SMTP) are
//     synchronous.
//
// The transport itself is a `Notifier` plugged in at startup. `LogNotifier` is the
// default and simply records what would have been sent.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core_modules::alert_log::Alert;
use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Alert(Alert),
    Message {
        subject: String,
        body: String,
        to_email: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Alert(_) => "alert",
            Notification::Message { .. } => "message",
        }
    }
}

/// A notification transport. Called from the blocking pool, one notification at a time.
pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// Records notifications in the log instead of sending them anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: &Notification) -> Result<(), DispatchError> {
        match notification {
            Notification::Alert(alert) => {
                info!(score = alert.score, timestamp = alert.timestamp, "motion alert notification");
            }
            Notification::Message { subject, to_email, .. } => {
                info!(%to_email, %subject, "message notification");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    /// Starts the delivery task. It runs until every dispatcher clone is dropped.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (dispatcher, mut rx) = Self::channel(capacity);
        let handle = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let notifier = Arc::clone(&notifier);
                let kind = notification.kind();
                let delivery =
                    tokio::task::spawn_blocking(move || notifier.deliver(&notification)).await;
                match delivery {
                    Ok(Ok(())) => debug!(kind, "notification delivered"),
                    Ok(Err(e)) => warn!(kind, "{e}"),
                    Err(e) => warn!(kind, "notification delivery task failed: {e}"),
                }
            }
            debug!("notification queue closed, delivery task exiting");
        });
        (dispatcher, handle)
    }

    /// A dispatcher whose queue is read by the caller instead of a delivery task.
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn submit(&self, notification: Notification) -> Result<(), DispatchError> {
        let kind = notification.kind();
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull(kind),
            mpsc::error::TrySendError::Closed(_) => DispatchError::QueueClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        delivered: Mutex<Vec<Notification>>,
        fail_messages: bool,
    }

    impl Notifier for Recording {
        fn deliver(&self, notification: &Notification) -> Result<(), DispatchError> {
            if self.fail_messages && matches!(notification, Notification::Message { .. }) {
                return Err(DispatchError::Delivery("smtp refused".to_string()));
            }
            self.delivered.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn alert(score: u8) -> Notification {
        Notification::Alert(Alert {
            image: String::new(),
            score,
            timestamp: 0,
        })
    }

    fn message() -> Notification {
        Notification::Message {
            subject: "Password reset".to_string(),
            body: "code 1234".to_string(),
            to_email: "ops@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_in_submission_order() {
        let notifier = Arc::new(Recording::default());
        let (dispatcher, handle) = NotificationDispatcher::spawn(notifier.clone(), 8);

        dispatcher.submit(alert(1)).unwrap();
        dispatcher.submit(message()).unwrap();
        dispatcher.submit(alert(2)).unwrap();
        drop(dispatcher);
        handle.await.unwrap();

        let delivered = notifier.delivered.lock().unwrap();
        assert_eq!(*delivered, vec![alert(1), message(), alert(2)]);
    }

    #[tokio::test]
    async fn delivery_failures_do_not_stop_the_queue() {
        let notifier = Arc::new(Recording {
            fail_messages: true,
            ..Default::default()
        });
        let (dispatcher, handle) = NotificationDispatcher::spawn(notifier.clone(), 8);

        dispatcher.submit(message()).unwrap();
        dispatcher.submit(alert(7)).unwrap();
        drop(dispatcher);
        handle.await.unwrap();

        assert_eq!(*notifier.delivered.lock().unwrap(), vec![alert(7)]);
    }

    #[test]
    fn full_queue_is_reported_without_blocking() {
        let (dispatcher, _rx) = NotificationDispatcher::channel(1);
        dispatcher.submit(alert(1)).unwrap();
        assert!(matches!(dispatcher.submit(alert(2)), Err(DispatchError::QueueFull("alert"))));
    }

    #[test]
    fn closed_queue_is_reported() {
        let (dispatcher, rx) = NotificationDispatcher::channel(4);
        drop(rx);
        assert!(matches!(dispatcher.submit(message()), Err(DispatchError::QueueClosed)));
    }

    #[test]
    fn log_notifier_accepts_everything() {
        assert!(LogNotifier.deliver(&alert(3)).is_ok());
        assert!(LogNotifier.deliver(&message()).is_ok());
    }
}
