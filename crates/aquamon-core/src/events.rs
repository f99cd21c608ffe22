//! Event bus for readings, connection state and notifications.
//!
//! Two delivery paths share one bus:
//!
//! - **Reading subscribers** registered with [`EventBus::subscribe`] are
//!   plain callbacks, invoked synchronously in registration order each time a
//!   reading is published. Nothing is buffered or reordered.
//! - **Async consumers** call [`EventBus::events`] to receive every
//!   [`MonitorEvent`] through a `tokio::sync::broadcast` channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use aquamon_types::{ConnectionState, SensorReading, SyncStatus};

use crate::notify::Notification;
use crate::util::lock;

/// Events published by the monitor.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum MonitorEvent {
    /// A new reading arrived.
    Reading { reading: SensorReading },
    /// The connection state changed.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        /// Classified error text when the change was caused by a failure.
        reason: Option<String>,
    },
    /// A user-facing notification was raised.
    Notification { notification: Notification },
    /// The sync status changed.
    SyncStatus { status: SyncStatus },
    /// Network reachability changed.
    Connectivity { online: bool },
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked for each published reading.
pub type ReadingCallback = Arc<dyn Fn(&SensorReading) + Send + Sync>;

/// Receiver for monitor events.
pub type EventReceiver = broadcast::Receiver<MonitorEvent>;

struct Inner {
    subscribers: Mutex<Vec<(SubscriptionId, ReadingCallback)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<MonitorEvent>,
}

/// Publish/subscribe hub shared by the coordinator, reconciler and UI.
///
/// Cloning is cheap and every clone refers to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("receivers", &self.inner.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus whose broadcast channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Register a reading callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SensorReading) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Remove a reading callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Number of registered reading callbacks.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Deliver a reading to every callback, then to async consumers.
    pub fn publish_reading(&self, reading: &SensorReading) {
        // Callbacks run outside the lock so they may (un)subscribe.
        let callbacks: Vec<ReadingCallback> = lock(&self.inner.subscribers)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(reading);
        }
        self.emit(MonitorEvent::Reading {
            reading: reading.clone(),
        });
    }

    /// Send an event to async consumers.
    pub fn emit(&self, event: MonitorEvent) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Receive all future events.
    pub fn events(&self) -> EventReceiver {
        self.inner.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
