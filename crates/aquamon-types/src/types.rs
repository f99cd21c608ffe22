//! Core types for tank water-quality data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};
use crate::uuid::{NUS_SERVICE, NUS_TX_CHARACTERISTIC, parse_uuid};

/// Default HTTP port of the ESP32 firmware.
pub const DEFAULT_HTTP_PORT: &str = "80";

/// Default HTTP path serving the current reading.
pub const DEFAULT_HTTP_ENDPOINT: &str = "turbidez";

/// Milliseconds since the Unix epoch for a point in time.
#[must_use]
pub fn epoch_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Milliseconds since the Unix epoch, now.
#[must_use]
pub fn now_millis() -> i64 {
    epoch_millis(OffsetDateTime::now_utc())
}

/// A point-in-time water-quality measurement.
///
/// Only turbidity is mandatory; the firmware variants differ in which
/// probes they carry. Readings are immutable once captured.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SensorReading {
    /// Turbidity in NTU.
    pub turbidity: f64,
    /// Water temperature in degrees Celsius.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub temperature: Option<f64>,
    /// pH.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub ph: Option<f64>,
    /// Dissolved oxygen in mg/L.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub dissolved_oxygen: Option<f64>,
    /// Total ammonia in mg/L.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub ammonia: Option<f64>,
    /// Battery level percentage (0-100).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub battery: Option<u8>,
    /// Connectivity flag reported by the device itself.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub connected: Option<bool>,
    /// Qualitative level label reported by the firmware (e.g. "limpa").
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub level: Option<String>,
    /// Capture time in epoch milliseconds.
    pub timestamp: i64,
}

impl SensorReading {
    /// Create a reading carrying only turbidity.
    pub fn new(turbidity: f64, timestamp: i64) -> Self {
        Self {
            turbidity,
            timestamp,
            ..Default::default()
        }
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature = Some(celsius);
        self
    }

    /// Set the pH.
    #[must_use]
    pub fn with_ph(mut self, ph: f64) -> Self {
        self.ph = Some(ph);
        self
    }

    /// Set dissolved oxygen.
    #[must_use]
    pub fn with_dissolved_oxygen(mut self, mg_per_l: f64) -> Self {
        self.dissolved_oxygen = Some(mg_per_l);
        self
    }

    /// Set ammonia.
    #[must_use]
    pub fn with_ammonia(mut self, mg_per_l: f64) -> Self {
        self.ammonia = Some(mg_per_l);
        self
    }

    /// Set the battery level.
    #[must_use]
    pub fn with_battery(mut self, percent: u8) -> Self {
        self.battery = Some(percent);
        self
    }

    /// Set the qualitative level label.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Capture time as an `OffsetDateTime`, if representable.
    pub fn captured_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.timestamp) * 1_000_000).ok()
    }
}

/// A reading explicitly logged by the user, queued for upload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SavedReading {
    /// Locally generated unique identifier; doubles as the upload idempotency key.
    pub id: String,
    /// The measurement itself.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub reading: SensorReading,
    /// Name of the tank the reading was taken in.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub tank: Option<String>,
    /// Free-form notes.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub notes: Option<String>,
    /// Whether the remote API has acknowledged this reading.
    #[cfg_attr(feature = "serde", serde(default))]
    pub synced: bool,
}

impl SavedReading {
    /// Wrap a reading as a new, unsynced entry.
    pub fn new(id: impl Into<String>, reading: SensorReading) -> Self {
        Self {
            id: id.into(),
            reading,
            tank: None,
            notes: None,
            synced: false,
        }
    }
}

/// Transport used to reach the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConnectionType {
    /// HTTP polling over the local network.
    #[default]
    Wifi,
    /// BLE notifications.
    Bluetooth,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Wifi => write!(f, "wifi"),
            ConnectionType::Bluetooth => write!(f, "bluetooth"),
        }
    }
}

impl core::str::FromStr for ConnectionType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wifi" | "http" => Ok(ConnectionType::Wifi),
            "bluetooth" | "ble" => Ok(ConnectionType::Bluetooth),
            other => Err(ParseError::InvalidData(format!(
                "unknown connection type '{other}'"
            ))),
        }
    }
}

/// Address of an ESP32 reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct HttpDeviceConfig {
    /// Host name or IP address.
    pub ip: String,
    /// TCP port, as entered.
    pub port: String,
    /// Path of the reading endpoint, without a leading slash.
    pub endpoint: String,
    /// Whether the user completed setup.
    pub is_configured: bool,
}

impl Default for HttpDeviceConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: DEFAULT_HTTP_PORT.to_string(),
            endpoint: DEFAULT_HTTP_ENDPOINT.to_string(),
            is_configured: false,
        }
    }
}

impl HttpDeviceConfig {
    /// Build a configuration from user input.
    ///
    /// Blank port and endpoint fall back to the defaults. The result is only
    /// marked configured when an address was given.
    pub fn new(ip: &str, port: &str, endpoint: &str) -> Self {
        let ip = ip.trim().to_string();
        let port = match port.trim() {
            "" => DEFAULT_HTTP_PORT.to_string(),
            p => p.to_string(),
        };
        let endpoint = match endpoint.trim().trim_start_matches('/') {
            "" => DEFAULT_HTTP_ENDPOINT.to_string(),
            e => e.to_string(),
        };
        let is_configured = !ip.is_empty();
        Self {
            ip,
            port,
            endpoint,
            is_configured,
        }
    }

    /// Whether this configuration identifies a device.
    pub fn is_valid(&self) -> bool {
        self.is_configured && !self.ip.trim().is_empty()
    }

    /// The port as a number, if it is one.
    pub fn port_number(&self) -> Option<u16> {
        self.port.trim().parse().ok().filter(|p| *p != 0)
    }

    /// Full URL of the reading endpoint.
    pub fn url(&self) -> String {
        format!(
            "http://{}:{}/{}",
            self.ip.trim(),
            self.port.trim(),
            self.endpoint.trim_start_matches('/')
        )
    }
}

/// BLE identity of the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct BleDeviceConfig {
    /// Service to filter the device scan by.
    pub service_uuid: String,
    /// Characteristic that notifies readings.
    pub characteristic_uuid: String,
    /// Optional advertised name to prefer when several devices match.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub device_name: Option<String>,
    /// Whether the user completed setup.
    pub is_configured: bool,
}

impl Default for BleDeviceConfig {
    fn default() -> Self {
        Self {
            service_uuid: NUS_SERVICE.to_string(),
            characteristic_uuid: NUS_TX_CHARACTERISTIC.to_string(),
            device_name: None,
            is_configured: false,
        }
    }
}

impl BleDeviceConfig {
    /// Build a configuration from user input.
    pub fn new(service_uuid: &str, characteristic_uuid: &str, device_name: Option<&str>) -> Self {
        let service_uuid = service_uuid.trim().to_ascii_lowercase();
        let characteristic_uuid = characteristic_uuid.trim().to_ascii_lowercase();
        let device_name = device_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let is_configured = !service_uuid.is_empty() && !characteristic_uuid.is_empty();
        Self {
            service_uuid,
            characteristic_uuid,
            device_name,
            is_configured,
        }
    }

    /// Configuration for the stock NUS firmware.
    pub fn nordic_uart(device_name: Option<&str>) -> Self {
        Self::new(
            &NUS_SERVICE.to_string(),
            &NUS_TX_CHARACTERISTIC.to_string(),
            device_name,
        )
    }

    /// Whether this configuration identifies a device.
    pub fn is_valid(&self) -> bool {
        self.is_configured
            && !self.service_uuid.trim().is_empty()
            && !self.characteristic_uuid.trim().is_empty()
    }

    /// Parsed service UUID.
    pub fn service(&self) -> ParseResult<uuid::Uuid> {
        parse_uuid(&self.service_uuid)
    }

    /// Parsed characteristic UUID.
    pub fn characteristic(&self) -> ParseResult<uuid::Uuid> {
        parse_uuid(&self.characteristic_uuid)
    }
}

/// Device configuration for either transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "transport", rename_all = "lowercase"))]
pub enum DeviceConfig {
    /// HTTP polling.
    Http(HttpDeviceConfig),
    /// BLE notifications.
    Ble(BleDeviceConfig),
}

impl DeviceConfig {
    /// Whether the identifying fields are set and setup was completed.
    pub fn is_valid(&self) -> bool {
        match self {
            DeviceConfig::Http(c) => c.is_valid(),
            DeviceConfig::Ble(c) => c.is_valid(),
        }
    }

    /// The transport this configuration is for.
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            DeviceConfig::Http(_) => ConnectionType::Wifi,
            DeviceConfig::Ble(_) => ConnectionType::Bluetooth,
        }
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConfig::Http(c) if c.is_valid() => write!(f, "{}", c.url()),
            DeviceConfig::Ble(c) if c.is_valid() => match &c.device_name {
                Some(name) => write!(f, "BLE '{}' ({})", name, c.service_uuid),
                None => write!(f, "BLE service {}", c.service_uuid),
            },
            _ => write!(f, "not configured"),
        }
    }
}

/// Connection state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ConnectionState {
    /// No usable device configuration.
    #[default]
    NotConfigured,
    /// First read in progress.
    Testing,
    /// Reads are succeeding and polling is active.
    Connected,
    /// The last read failed; polling is torn down.
    Failed,
    /// Stopped on request; waits for reconfiguration.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::NotConfigured => "not-configured",
            ConnectionState::Testing => "testing",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Status of the pending-readings upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SyncStatus {
    /// Nothing happening.
    #[default]
    Idle,
    /// Draining the queue.
    Syncing,
    /// The last drain completed.
    Synced,
    /// The last drain stopped on a failure.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Snapshot of the authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AuthUser {
    /// Provider user id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// E-mail address.
    pub email: String,
    /// Administrator flag.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_admin: bool,
    /// Additional role names.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub roles: Vec<String>,
}

impl AuthUser {
    /// Whether the user holds a role (administrators hold every role).
    pub fn has_role(&self, role: &str) -> bool {
        self.is_admin || self.roles.iter().any(|r| r == role)
    }
}

/// How a tank is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TankConstruction {
    /// Excavated earthen pond.
    Earthen,
    /// Masonry or concrete.
    Concrete,
    /// Geomembrane liner.
    Liner,
    /// Fiberglass or plastic vessel.
    Fiberglass,
    /// Anything else.
    #[default]
    Other,
}

impl fmt::Display for TankConstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TankConstruction::Earthen => "earthen",
            TankConstruction::Concrete => "concrete",
            TankConstruction::Liner => "liner",
            TankConstruction::Fiberglass => "fiberglass",
            TankConstruction::Other => "other",
        };
        f.write_str(label)
    }
}

impl core::str::FromStr for TankConstruction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earthen" => Ok(TankConstruction::Earthen),
            "concrete" => Ok(TankConstruction::Concrete),
            "liner" => Ok(TankConstruction::Liner),
            "fiberglass" => Ok(TankConstruction::Fiberglass),
            "other" => Ok(TankConstruction::Other),
            other => Err(ParseError::InvalidData(format!(
                "unknown tank construction '{other}'"
            ))),
        }
    }
}

/// A fish tank registered by the user.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Tank {
    /// Generated identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Construction type.
    pub construction: TankConstruction,
    /// Fish species raised.
    pub species: String,
    /// Number of fish.
    pub fish_count: u32,
    /// Average fish weight in grams.
    pub average_weight_g: f64,
    /// Water surface area in square metres.
    pub area_m2: f64,
    /// When the tank was registered.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub created_at: OffsetDateTime,
}

impl Tank {
    /// Estimated biomass in kilograms.
    pub fn biomass_kg(&self) -> f64 {
        f64::from(self.fish_count) * self.average_weight_g / 1000.0
    }

    /// Stocking density in fish per square metre, if the area is known.
    pub fn stocking_density(&self) -> Option<f64> {
        (self.area_m2 > 0.0).then(|| f64::from(self.fish_count) / self.area_m2)
    }
}

/// User input for registering or editing a tank.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TankDraft {
    /// Display name.
    pub name: String,
    /// Construction type.
    pub construction: TankConstruction,
    /// Fish species raised.
    pub species: String,
    /// Number of fish.
    pub fish_count: u32,
    /// Average fish weight in grams.
    pub average_weight_g: f64,
    /// Water surface area in square metres.
    pub area_m2: f64,
}

impl TankDraft {
    /// Check the draft for values a tank cannot have.
    pub fn validate(&self) -> ParseResult<()> {
        if self.name.trim().is_empty() {
            return Err(ParseError::InvalidData("tank name cannot be empty".into()));
        }
        if !self.average_weight_g.is_finite() || self.average_weight_g < 0.0 {
            return Err(ParseError::InvalidData(
                "average weight must be a non-negative number".into(),
            ));
        }
        if !self.area_m2.is_finite() || self.area_m2 < 0.0 {
            return Err(ParseError::InvalidData(
                "area must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}
