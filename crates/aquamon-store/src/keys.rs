//! Names of the persisted blobs.
//!
//! These match the local-storage keys used by the web client, so a blob
//! exported from one can be imported into the other.

/// Registered tanks.
pub const TANKS: &str = "tanks";

/// HTTP device configuration.
pub const HTTP_DEVICE: &str = "esp32-config-storage";

/// BLE device configuration.
pub const BLE_DEVICE: &str = "bluetooth-config-storage";

/// Active transport selection.
pub const CONNECTION_TYPE: &str = "connection-type-storage";

/// Last sensor snapshot and the pending-readings queue.
pub const OFFLINE_DATA: &str = "offline-data-storage";

/// Cached identity for offline access.
pub const OFFLINE_AUTH: &str = "offline-auth-storage";

/// Every key the application writes.
pub const ALL: [&str; 6] = [
    TANKS,
    HTTP_DEVICE,
    BLE_DEVICE,
    CONNECTION_TYPE,
    OFFLINE_DATA,
    OFFLINE_AUTH,
];
