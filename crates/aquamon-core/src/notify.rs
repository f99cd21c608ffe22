//! User-facing notifications.
//!
//! The coordinator raises a [`Notification`] on a few state transitions.
//! Where it ends up (toast, terminal line, log) is decided by the
//! [`Notifier`] the application installs.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::util::lock;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum NotificationKind {
    /// The first read succeeded.
    Connected,
    /// A poll failed while connected.
    ConnectionLost,
    /// No usable device configuration; the user should set one up.
    ConfigurationRequired,
    /// Saved readings could not be uploaded.
    SyncFailed,
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Category.
    pub kind: NotificationKind,
    /// Display text.
    pub message: String,
}

impl Notification {
    /// Create a notification.
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Sink for notifications.
pub trait Notifier: Send + Sync {
    /// Present a notification to the user.
    fn notify(&self, notification: &Notification);
}

/// Notifier that writes to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::ConnectionLost | NotificationKind::SyncFailed => {
                warn!(kind = ?notification.kind, "{}", notification.message)
            }
            _ => info!(kind = ?notification.kind, "{}", notification.message),
        }
    }
}

/// Notifier that keeps every notification. Useful for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications received so far.
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.seen).clone()
    }

    /// How many notifications of `kind` were received.
    pub fn count(&self, kind: NotificationKind) -> usize {
        lock(&self.seen).iter().filter(|n| n.kind == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        lock(&self.seen).push(notification.clone());
    }
}

/// Rate limit for a repeated notification.
///
/// Uses tokio's clock, so paused-time tests control it.
#[derive(Debug)]
pub struct NotificationThrottle {
    period: Duration,
    last: Option<Instant>,
}

impl NotificationThrottle {
    /// Allow at most one notification per `period`.
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Whether a notification may be shown now; records it if so.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forget the last notification time.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_throttle_allows_once_per_period() {
        let mut throttle = NotificationThrottle::new(Duration::from_secs(30));
        assert!(throttle.allow());
        assert!(!throttle.allow());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!throttle.allow());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(throttle.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_reset() {
        let mut throttle = NotificationThrottle::new(Duration::from_secs(30));
        assert!(throttle.allow());
        throttle.reset();
        assert!(throttle.allow());
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.notify(&Notification::new(NotificationKind::Connected, "ok"));
        notifier.notify(&Notification::new(NotificationKind::ConnectionLost, "lost"));
        notifier.notify(&Notification::new(NotificationKind::ConnectionLost, "lost"));

        assert_eq!(notifier.count(NotificationKind::ConnectionLost), 2);
        assert_eq!(notifier.notifications()[0].message, "ok");
    }
}
