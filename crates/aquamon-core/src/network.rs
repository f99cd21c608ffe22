//! Online/offline detection.
//!
//! [`NetworkMonitor`] holds the current reachability as a `watch` value. It
//! can be driven by hand (tests, the CLI's `--offline` flag) or by a periodic
//! probe of the API health endpoint.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{EventBus, MonitorEvent};

/// Timeout for one reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared online/offline flag.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
    events: Option<EventBus>,
}

impl NetworkMonitor {
    /// Create a monitor with an initial state.
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
            events: None,
        }
    }

    /// Publish connectivity changes on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Update the state. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
            if let Some(bus) = &self.events {
                bus.emit(MonitorEvent::Connectivity { online });
            }
        }
        changed
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Probe `url` every `interval` until `cancel` fires.
    pub fn spawn_probe(
        &self,
        client: Client,
        url: String,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Connectivity probe stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let online = probe(&client, &url).await;
                        monitor.set_online(online);
                    }
                }
            }
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Whether `url` answers with a success status.
pub async fn probe(client: &Client, url: &str) -> bool {
    match client.get(url).timeout(PROBE_TIMEOUT).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!(url, "Probe failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::routing::get;

    #[test]
    fn test_set_online_reports_changes() {
        let monitor = NetworkMonitor::new(true);
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_changes_are_published_on_bus() {
        let bus = EventBus::default();
        let mut events = bus.events();
        let monitor = NetworkMonitor::new(true).with_events(bus);

        monitor.set_online(false);
        assert_eq!(
            events.recv().await.unwrap(),
            MonitorEvent::Connectivity { online: false }
        );
    }

    #[tokio::test]
    async fn test_probe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route("/api/health", get(|| async { "ok" }));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = Client::new();
        assert!(probe(&client, &format!("http://{addr}/api/health")).await);
        assert!(!probe(&client, &format!("http://{addr}/missing")).await);
    }

    #[tokio::test]
    async fn test_probe_task_marks_offline() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();
        let handle = monitor.spawn_probe(
            Client::new(),
            format!("http://{addr}/api/health"),
            Duration::from_millis(50),
            cancel.clone(),
        );

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!monitor.is_online());

        cancel.cancel();
        handle.await.unwrap();
    }
}
