//! Platform-agnostic types for fish-tank water-quality monitoring.
//!
//! This crate provides the shared data model used by the connectivity core
//! (aquamon-core), the local store (aquamon-store) and the relay service
//! (aquamon-service).
//!
//! # Features
//!
//! - Sensor readings and the queue entries users save for upload
//! - Device configuration for the HTTP and BLE transports
//! - Decoding of the ESP32 firmware's JSON and plain-number payloads
//! - UUID constants for the Nordic UART Service
//! - Error types for payload parsing
//!
//! # Example
//!
//! ```
//! use aquamon_types::{HttpDeviceConfig, payload};
//!
//! let config = HttpDeviceConfig::new("192.168.4.1", "", "");
//! assert_eq!(config.url(), "http://192.168.4.1:80/turbidez");
//!
//! let reading = payload::parse_http_body(br#"{"turbidez": 42.0}"#, 0).unwrap();
//! assert_eq!(reading.turbidity, 42.0);
//! ```

pub mod error;
#[cfg(feature = "serde")]
pub mod payload;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    AuthUser, BleDeviceConfig, ConnectionState, ConnectionType, DEFAULT_HTTP_ENDPOINT,
    DEFAULT_HTTP_PORT, DeviceConfig, HttpDeviceConfig, SavedReading, SensorReading, SyncStatus,
    Tank, TankConstruction, TankDraft, epoch_millis, now_millis,
};
pub use uuid as uuids;
