//! Sync reconciler.
//!
//! Drains the offline queue into the remote readings API. Uploads run one
//! at a time in queue order. The first failure stops the drain; entries not
//! yet uploaded stay queued for the next trigger. Delivery is at-least-once:
//! every upload carries the entry id as an idempotency key so the API can
//! drop repeats.
//!
//! The reconciler publishes a [`SyncStatus`] that falls back to
//! [`SyncStatus::Idle`] a few seconds after each drain finishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aquamon_types::{SavedReading, SyncStatus, now_millis};

use crate::error::{Error, Result};
use crate::events::{EventBus, MonitorEvent};
use crate::network::NetworkMonitor;
use crate::notify::{LogNotifier, Notification, NotificationKind, Notifier};
use crate::offline::OfflineDataCache;

/// How long `Synced`/`Error` stay visible before reverting to `Idle`.
pub const SYNC_STATUS_DISPLAY: Duration = Duration::from_secs(3);

/// Path of the readings endpoint on the API.
pub const READINGS_PATH: &str = "/api/readings";

/// Header carrying the entry id.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Timeout for one upload.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Destination for saved readings.
#[async_trait]
pub trait ReadingUploader: Send + Sync {
    /// Upload one reading.
    async fn upload(&self, reading: &SavedReading) -> Result<()>;
}

/// Uploads readings to `{api}/api/readings`.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    endpoint: String,
}

impl HttpUploader {
    /// Create an uploader for the API at `api_url`.
    pub fn new(api_url: &str) -> Result<Self> {
        let api_url = api_url.trim().trim_end_matches('/');
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(Error::invalid_config(format!(
                "API URL must start with http:// or https://, got: {api_url}"
            )));
        }
        Ok(Self {
            client: Client::new(),
            endpoint: format!("{api_url}{READINGS_PATH}"),
        })
    }

    /// The full endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReadingUploader for HttpUploader {
    async fn upload(&self, reading: &SavedReading) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, &reading.id)
            .json(reading)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Upload {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(id = %reading.id, status = status.as_u16(), "Uploaded reading");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let message: String = body.chars().take(200).collect();
        Err(Error::Upload {
            status: Some(status.as_u16()),
            message,
        })
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries uploaded in this drain.
    pub uploaded: usize,
    /// Entries still queued afterwards.
    pub pending: usize,
    /// Why the drain stopped early.
    pub error: Option<String>,
}

impl SyncReport {
    /// Whether the drain completed.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Drains the offline queue into a [`ReadingUploader`].
///
/// Cloning is cheap; clones share status and the drain lock.
#[derive(Clone)]
pub struct SyncReconciler {
    cache: OfflineDataCache,
    uploader: Arc<dyn ReadingUploader>,
    status: Arc<watch::Sender<SyncStatus>>,
    generation: Arc<AtomicU64>,
    drain_lock: Arc<Mutex<()>>,
    display_delay: Duration,
    events: EventBus,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for SyncReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncReconciler")
            .field("status", &self.status())
            .field("display_delay", &self.display_delay)
            .finish()
    }
}

impl SyncReconciler {
    /// Create a reconciler.
    pub fn new(cache: OfflineDataCache, uploader: Arc<dyn ReadingUploader>) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            cache,
            uploader,
            status: Arc::new(status),
            generation: Arc::new(AtomicU64::new(0)),
            drain_lock: Arc::new(Mutex::new(())),
            display_delay: SYNC_STATUS_DISPLAY,
            events: EventBus::default(),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Publish status and notifications on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = bus;
        self
    }

    /// Send failure notifications to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Change how long a final status stays visible.
    pub fn display_delay(mut self, delay: Duration) -> Self {
        self.display_delay = delay;
        self
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
        self.events.emit(MonitorEvent::SyncStatus { status });
    }

    fn revert_to_idle_later(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.display_delay).await;
            if this.generation.load(Ordering::SeqCst) == generation {
                this.set_status(SyncStatus::Idle);
            }
        });
    }

    fn fail(&self, error: Error, uploaded: usize, pending: usize) -> SyncReport {
        warn!(uploaded, pending, "Sync stopped: {}", error);
        self.set_status(SyncStatus::Error);
        let notification = Notification::new(NotificationKind::SyncFailed, error.user_message());
        self.notifier.notify(&notification);
        self.events.emit(MonitorEvent::Notification { notification });
        self.revert_to_idle_later();
        SyncReport {
            uploaded,
            pending,
            error: Some(error.to_string()),
        }
    }

    /// Upload every pending reading, oldest first.
    ///
    /// An empty queue leaves the status untouched.
    pub async fn sync(&self) -> SyncReport {
        let _drain = self.drain_lock.lock().await;

        let pending = match self.cache.get_unsynced_readings() {
            Ok(pending) => pending,
            Err(e) => return self.fail(e, 0, 0),
        };
        if pending.is_empty() {
            debug!("Nothing to sync");
            return SyncReport::default();
        }

        // Supersede any pending revert from the previous drain
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_status(SyncStatus::Syncing);
        info!(count = pending.len(), "Syncing saved readings");

        let total = pending.len();
        let mut uploaded = 0;
        for entry in &pending {
            if let Err(e) = self.uploader.upload(entry).await {
                return self.fail(e, uploaded, total - uploaded);
            }
            if let Err(e) = self.cache.mark_reading_as_synced(&entry.id) {
                return self.fail(e, uploaded, total - uploaded);
            }
            uploaded += 1;
        }

        let finished = self
            .cache
            .clear_synced_readings()
            .and_then(|_| self.cache.set_last_sync_time(now_millis()));
        if let Err(e) = finished {
            return self.fail(e, uploaded, 0);
        }

        info!(uploaded, "Sync complete");
        self.set_status(SyncStatus::Synced);
        self.revert_to_idle_later();
        SyncReport {
            uploaded,
            pending: 0,
            error: None,
        }
    }

    /// Sync on every offline-to-online transition until `cancel` fires.
    pub fn watch_network(&self, network: &NetworkMonitor, cancel: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let mut online_rx = network.subscribe();
        tokio::spawn(async move {
            let mut was_online = *online_rx.borrow_and_update();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *online_rx.borrow_and_update();
                        if online && !was_online {
                            info!("Back online; syncing saved readings");
                            this.sync().await;
                        }
                        was_online = online;
                    }
                }
            }
            debug!("Network watcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::offline::memory_store;
    use aquamon_types::SensorReading;

    #[derive(Default)]
    struct FakeUploader {
        uploaded: StdMutex<Vec<String>>,
        fail_at: Option<usize>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
    }

    #[async_trait]
    impl ReadingUploader for FakeUploader {
        async fn upload(&self, reading: &SavedReading) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_at == Some(call) {
                return Err(Error::Upload {
                    status: Some(503),
                    message: "unavailable".into(),
                });
            }
            self.uploaded.lock().unwrap().push(reading.id.clone());
            Ok(())
        }
    }

    fn setup(uploader: FakeUploader) -> (SyncReconciler, OfflineDataCache, Arc<FakeUploader>) {
        let cache = OfflineDataCache::new(memory_store());
        let uploader = Arc::new(uploader);
        let reconciler = SyncReconciler::new(cache.clone(), uploader.clone());
        (reconciler, cache, uploader)
    }

    fn queue(cache: &OfflineDataCache, n: usize) -> Vec<String> {
        (0..n)
            .map(|i| cache.save_reading(SensorReading::new(i as f64, 1)).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_drain() {
        let (reconciler, cache, uploader) = setup(FakeUploader::default());
        let ids = queue(&cache, 3);

        let report = reconciler.sync().await;
        assert_eq!(report.uploaded, 3);
        assert!(report.is_complete());
        assert_eq!(*uploader.uploaded.lock().unwrap(), ids);
        assert!(cache.saved_readings().unwrap().is_empty());
        assert!(cache.last_sync_time().unwrap().is_some());
        assert_eq!(reconciler.status(), SyncStatus::Synced);

        tokio::time::sleep(SYNC_STATUS_DISPLAY + Duration::from_millis(10)).await;
        assert_eq!(reconciler.status(), SyncStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_halts_drain_and_keeps_rest_queued() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (reconciler, cache, uploader) = setup(FakeUploader {
            fail_at: Some(1),
            ..Default::default()
        });
        let reconciler = reconciler.with_notifier(notifier.clone());
        let ids = queue(&cache, 3);

        let report = reconciler.sync().await;
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.pending, 2);
        assert!(report.error.unwrap().contains("503"));
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);

        let unsynced: Vec<String> = cache
            .get_unsynced_readings()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(unsynced, ids[1..].to_vec());
        assert_eq!(reconciler.status(), SyncStatus::Error);
        assert_eq!(notifier.count(NotificationKind::SyncFailed), 1);
        assert!(cache.last_sync_time().unwrap().is_none());

        tokio::time::sleep(SYNC_STATUS_DISPLAY + Duration::from_millis(10)).await;
        assert_eq!(reconciler.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let (reconciler, _cache, uploader) = setup(FakeUploader::default());
        let report = reconciler.sync().await;
        assert_eq!(report, SyncReport::default());
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reconciler.status(), SyncStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uploads_are_sequential_even_with_concurrent_triggers() {
        let (reconciler, cache, uploader) = setup(FakeUploader {
            latency: Duration::from_millis(100),
            ..Default::default()
        });
        queue(&cache, 4);

        let a = tokio::spawn({
            let r = reconciler.clone();
            async move { r.sync().await }
        });
        let b = tokio::spawn({
            let r = reconciler.clone();
            async move { r.sync().await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.uploaded + b.uploaded, 4);
        assert_eq!(uploader.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_events_published() {
        let bus = EventBus::default();
        let mut events = bus.events();
        let (reconciler, cache, _) = setup(FakeUploader::default());
        let reconciler = reconciler.with_events(bus);
        queue(&cache, 1);

        reconciler.sync().await;
        assert_eq!(
            events.recv().await.unwrap(),
            MonitorEvent::SyncStatus {
                status: SyncStatus::Syncing
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            MonitorEvent::SyncStatus {
                status: SyncStatus::Synced
            }
        );
    }

    #[tokio::test]
    async fn test_reconnect_triggers_sync() {
        let (reconciler, cache, uploader) = setup(FakeUploader::default());
        let reconciler = reconciler.display_delay(Duration::from_secs(2));
        let network = NetworkMonitor::new(false);
        let cancel = CancellationToken::new();
        let handle = reconciler.watch_network(&network, cancel.clone());
        let mut status = reconciler.subscribe_status();

        queue(&cache, 2);
        network.set_online(true);

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == SyncStatus::Synced),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_http_uploader_rejects_bad_url() {
        assert!(HttpUploader::new("ftp://api").is_err());
        let uploader = HttpUploader::new("http://localhost:3000/").unwrap();
        assert_eq!(uploader.endpoint(), "http://localhost:3000/api/readings");
    }

    #[tokio::test]
    async fn test_http_uploader_sends_idempotency_key() {
        use axum::Router;
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::post;

        let router = Router::new()
            .route(
                READINGS_PATH,
                post(|headers: HeaderMap, axum::Json(body): axum::Json<serde_json::Value>| async move {
                    let key = headers
                        .get(IDEMPOTENCY_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if key == body["id"].as_str().unwrap_or_default() && body["turbidity"] == 9.0 {
                        StatusCode::CREATED
                    } else {
                        StatusCode::BAD_REQUEST
                    }
                }),
            )
            .route("/broken/api/readings", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let entry = SavedReading::new("abc-123", SensorReading::new(9.0, 1));
        let uploader = HttpUploader::new(&format!("http://{addr}")).unwrap();
        uploader.upload(&entry).await.unwrap();

        let broken = HttpUploader::new(&format!("http://{addr}/broken")).unwrap();
        let err = broken.upload(&entry).await.unwrap_err();
        assert!(matches!(err, Error::Upload { status: Some(500), .. }), "{err:?}");
    }
}
