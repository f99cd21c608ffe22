//! End-to-end tests for aquamon-core.
//!
//! A fake ESP32 and a fake readings API are served by axum on loopback
//! ports, so these run without hardware.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use tokio::time::timeout;

use aquamon_core::{
    ConnectionCoordinator, ConnectionState, CoordinatorOptions, Error, HttpDeviceConfig,
    HttpTransport, HttpTransportOptions, HttpUploader, Monitor, MonitorOptions, NetworkMonitor,
    NotificationKind, ReadingUploader, RecordingNotifier, SavedReading, SensorReading, SyncStatus,
};
use aquamon_store::Store;

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Device that answers once, then stops responding.
fn flaky_device(calls: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/turbidez",
        get(move || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    r#"{"turbidez": 45, "temperatura": 25.5}"#.to_string()
                } else {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    String::new()
                }
            }
        }),
    )
}

async fn wait_for(coordinator: &ConnectionCoordinator, target: ConnectionState) {
    let mut rx = coordinator.watch_state();
    timeout(Duration::from_secs(10), rx.wait_for(|s| *s == target))
        .await
        .expect("state not reached")
        .unwrap();
}

#[tokio::test]
async fn test_connect_then_timeout_loses_connection_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = serve(flaky_device(Arc::clone(&calls))).await;

    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = ConnectionCoordinator::builder()
        .options(CoordinatorOptions::default().poll_interval(Duration::from_millis(100)))
        .notifier(notifier.clone())
        .build()
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    coordinator.subscribe(move |r: &SensorReading| sink.lock().unwrap().push(r.clone()));

    let config = HttpDeviceConfig::new("127.0.0.1", &addr.port().to_string(), "turbidez");
    let options = HttpTransportOptions::default().direct_timeout(Duration::from_millis(300));
    let transport = HttpTransport::new(config, options).unwrap();

    coordinator.configure(Some(Arc::new(transport)));
    wait_for(&coordinator, ConnectionState::Connected).await;
    {
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].turbidity, 45.0);
        assert_eq!(received[0].temperature, Some(25.5));
    }

    wait_for(&coordinator, ConnectionState::Failed).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(notifier.count(NotificationKind::Connected), 1);
    assert_eq!(notifier.count(NotificationKind::ConnectionLost), 1);
    assert_eq!(coordinator.latest().unwrap().turbidity, 45.0);
    // No polling after the failure
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_slow_device_never_sees_overlapping_requests() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let router = {
        let (in_flight, peak, total) = (in_flight.clone(), peak.clone(), total.clone());
        Router::new().route(
            "/turbidez",
            get(move || {
                let (in_flight, peak, total) = (in_flight.clone(), peak.clone(), total.clone());
                async move {
                    let n = total.fetch_add(1, Ordering::SeqCst);
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    if n > 0 {
                        tokio::time::sleep(Duration::from_millis(350)).await;
                    }
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    r#"{"turbidez": 10}"#
                }
            }),
        )
    };
    let addr = serve(router).await;

    let coordinator = ConnectionCoordinator::builder()
        .options(CoordinatorOptions::default().poll_interval(Duration::from_millis(50)))
        .build()
        .unwrap();
    let config = HttpDeviceConfig::new("127.0.0.1", &addr.port().to_string(), "turbidez");
    let transport = HttpTransport::new(config, HttpTransportOptions::default()).unwrap();

    coordinator.configure(Some(Arc::new(transport)));
    wait_for(&coordinator, ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    coordinator.stop();

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(total.load(Ordering::SeqCst) >= 3);
    assert_eq!(coordinator.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_offline_readings_sync_when_back_online() {
    let keys = Arc::new(Mutex::new(Vec::<String>::new()));
    let router = {
        let keys = Arc::clone(&keys);
        Router::new().route(
            "/api/readings",
            post(move |headers: HeaderMap| {
                let keys = Arc::clone(&keys);
                async move {
                    if let Some(key) = headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()) {
                        keys.lock().unwrap().push(key.to_string());
                    }
                    StatusCode::CREATED
                }
            }),
        )
    };
    let addr = serve(router).await;

    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("data.db")).unwrap();
    let options = MonitorOptions {
        api_url: Some(format!("http://{addr}")),
        sync_status_display: Duration::from_secs(5),
        ..Default::default()
    };
    let monitor = Monitor::builder().options(options).build(store).unwrap();
    monitor.network().set_online(false);
    monitor.start().unwrap();

    let a = monitor
        .save_reading(SensorReading::new(12.0, 1), Some("Tanque 1".into()), None)
        .unwrap();
    let b = monitor
        .save_reading(SensorReading::new(14.0, 2), None, Some("turva".into()))
        .unwrap();
    assert_eq!(monitor.offline().pending_count().unwrap(), 2);

    let mut status = monitor.reconciler().unwrap().subscribe_status();
    monitor.network().set_online(true);
    timeout(
        Duration::from_secs(10),
        status.wait_for(|s| *s == SyncStatus::Synced),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(*keys.lock().unwrap(), vec![a, b]);
    assert_eq!(monitor.offline().pending_count().unwrap(), 0);
    assert!(monitor.offline().last_sync_time().unwrap().is_some());
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_failed_upload_keeps_queue_for_next_trigger() {
    let accept = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let router = {
        let accept = Arc::clone(&accept);
        Router::new().route(
            "/api/readings",
            post(move || {
                let accept = Arc::clone(&accept);
                async move {
                    if accept.load(Ordering::SeqCst) {
                        StatusCode::CREATED
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }
            }),
        )
    };
    let addr = serve(router).await;

    let notifier = Arc::new(RecordingNotifier::new());
    let options = MonitorOptions {
        api_url: Some(format!("http://{addr}")),
        ..Default::default()
    };
    let monitor = Monitor::builder()
        .options(options)
        .notifier(notifier.clone())
        .network(NetworkMonitor::new(false))
        .build(Store::open_in_memory().unwrap())
        .unwrap();

    monitor
        .save_reading(SensorReading::new(1.0, 1), None, None)
        .unwrap();
    let report = monitor.sync_now().await.unwrap();
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.pending, 1);
    assert_eq!(notifier.count(NotificationKind::SyncFailed), 1);
    assert_eq!(monitor.offline().pending_count().unwrap(), 1);

    accept.store(true, Ordering::SeqCst);
    let report = monitor.sync_now().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(monitor.offline().pending_count().unwrap(), 0);
}

#[tokio::test]
async fn test_persisted_configuration_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.db");

    {
        let monitor = Monitor::builder()
            .build(Store::open(&path).unwrap())
            .unwrap();
        monitor
            .settings()
            .set_http_config(&HttpDeviceConfig::new("192.168.1.100", "80", "turbidez"))
            .unwrap();
        monitor
            .offline()
            .set_cached_sensor_data(&SensorReading::new(45.0, 7))
            .unwrap();
    }

    let monitor = Monitor::builder()
        .options(MonitorOptions::default())
        .build(Store::open(&path).unwrap())
        .unwrap();
    let http = monitor.settings().http_config().unwrap();
    assert_eq!(http.url(), "http://192.168.1.100:80/turbidez");
    assert_eq!(
        monitor
            .offline()
            .cached_sensor_data()
            .unwrap()
            .unwrap()
            .turbidity,
        45.0
    );
}

async fn serve_relay() -> SocketAddr {
    let store = Store::open_in_memory().unwrap();
    let mut config = aquamon_service::Config::default();
    config.relay.timeout_secs = 1;
    serve(aquamon_service::app(aquamon_service::AppState::new(store, config))).await
}

#[tokio::test]
async fn test_reading_through_relay_service() {
    let calls = Arc::new(AtomicUsize::new(0));
    let device = serve(flaky_device(Arc::clone(&calls))).await;
    let relay = serve_relay().await;

    let config = HttpDeviceConfig::new("127.0.0.1", &device.port().to_string(), "turbidez");
    let options = HttpTransportOptions::default().relay(format!("http://{relay}/"));
    let transport = HttpTransport::new(config, options).unwrap();
    assert!(transport.via_relay());

    let reading = transport.get_data().await.unwrap();
    assert_eq!(reading.turbidity, 45.0);

    // Second request hangs upstream; the relay answers 408
    let err = transport.get_data().await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
}

#[tokio::test]
async fn test_relay_refuses_public_device() {
    let relay = serve_relay().await;
    let config = HttpDeviceConfig::new("8.8.8.8", "80", "turbidez");
    let options = HttpTransportOptions::default().relay(format!("http://{relay}"));
    let transport = HttpTransport::new(config, options).unwrap();

    let err = transport.get_data().await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)), "{err:?}");
    assert!(!transport.test_connection().await);
}

#[tokio::test]
async fn test_sync_against_readings_service_is_idempotent() {
    let relay = serve_relay().await;
    let options = MonitorOptions {
        api_url: Some(format!("http://{relay}")),
        ..Default::default()
    };
    let monitor = Monitor::builder()
        .options(options)
        .network(NetworkMonitor::new(false))
        .build(Store::open_in_memory().unwrap())
        .unwrap();

    let id = monitor
        .save_reading(SensorReading::new(21.0, 10), Some("Tanque 2".into()), None)
        .unwrap();
    let report = monitor.sync_now().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.uploaded, 1);

    // A retried upload of the same entry is acknowledged, not duplicated
    let uploader = HttpUploader::new(&format!("http://{relay}")).unwrap();
    let mut entry = SavedReading::new(id.clone(), SensorReading::new(21.0, 10));
    entry.tank = Some("Tanque 2".into());
    uploader.upload(&entry).await.unwrap();

    let listed: serde_json::Value = reqwest::get(format!("http://{relay}/api/readings"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["data"][0]["id"], id.as_str());
}
