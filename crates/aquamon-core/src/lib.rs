//! Connectivity and offline-resilience core for ESP32 tank sensors.
//!
//! This crate talks to a water-quality sensor over Wi-Fi (HTTP polling) or
//! Bluetooth Low Energy (notifications), tracks the connection through a
//! small state machine, and keeps the application usable offline.
//!
//! # Features
//!
//! - **Two transports**: [`HttpTransport`] (direct or through a relay) and
//!   [`BleTransport`] (Nordic UART style notify characteristic)
//! - **Connection coordinator**: testing/connected/failed state machine
//!   with fixed-interval polling and at most one read in flight
//! - **Offline data cache**: last-known reading plus a queue of manual
//!   readings waiting for upload
//! - **Offline auth cache**: 24-hour cached session for offline access
//! - **Sync reconciler**: drains the queue when connectivity returns
//! - **Event bus**: ordered reading callbacks and a broadcast event stream
//!
//! # Transports
//!
//! | Transport | Wire format | Failure classes |
//! |-----------|-------------|-----------------|
//! | HTTP | `GET http://{ip}:{port}/{endpoint}` → JSON | NotFound, Timeout, Unreachable, Malformed |
//! | BLE | UTF-8 JSON or bare number per notification | BluetoothUnavailable, NotFound, Timeout |
//!
//! # Quick Start
//!
//! ```no_run
//! use aquamon_core::{Monitor, MonitorOptions};
//! use aquamon_store::Store;
//! use aquamon_types::HttpDeviceConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let monitor = Monitor::builder()
//!         .options(MonitorOptions::default())
//!         .build(Store::open_default()?)?;
//!
//!     monitor.coordinator().subscribe(|reading| {
//!         println!("Turbidity: {} NTU", reading.turbidity);
//!     });
//!     monitor.apply_http_config(&HttpDeviceConfig::new("192.168.1.100", "80", "turbidez"))?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod ble;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod http;
pub mod mock;
pub mod monitor;
pub mod network;
pub mod notify;
pub mod offline;
pub mod settings;
pub mod sync;
pub mod transport;
pub mod util;

// Re-export types and uuid modules from aquamon-types
pub use aquamon_types::types;
pub use aquamon_types::uuid as uuids;

// Core exports
pub use auth::{AccessDecision, OFFLINE_SESSION_WINDOW, OfflineAuthCache, OfflineAuthState};
pub use ble::{
    BleCandidate, BleOptions, BleTransport, DevicePicker, FirstMatchPicker,
    PickerOutcome,
};
pub use coordinator::{
    CONFIG_PROMPT_THROTTLE, ConnectionCoordinator, CoordinatorBuilder, CoordinatorOptions,
    DEFAULT_POLL_INTERVAL, PollOutcome,
};
pub use error::{Error, Result};
pub use events::{EventBus, EventReceiver, MonitorEvent, ReadingCallback, SubscriptionId};
pub use http::{HttpTransport, HttpTransportOptions};
pub use mock::{MockFailure, MockTransport};
pub use monitor::{DefaultTransportFactory, Monitor, MonitorBuilder, MonitorOptions, TransportFactory};
pub use network::NetworkMonitor;
pub use notify::{
    LogNotifier, Notification, NotificationKind, NotificationThrottle, Notifier,
    RecordingNotifier,
};
pub use offline::{OfflineData, OfflineDataCache, SharedStore};
pub use settings::DeviceSettings;
pub use sync::{HttpUploader, ReadingUploader, SyncReconciler, SyncReport};
pub use transport::{DeviceTransport, TransportEvent};
pub use util::{Clock, ManualClock, SystemClock, format_peripheral_id};

// Re-export from aquamon-types
pub use aquamon_types::{
    BleDeviceConfig, ConnectionState, ConnectionType, DeviceConfig, HttpDeviceConfig,
    SavedReading, SensorReading, SyncStatus,
};
