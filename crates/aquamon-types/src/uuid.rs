//! Bluetooth UUIDs for the tank sensor's BLE profile.
//!
//! The ESP32 firmware exposes a Nordic UART Service (NUS): one characteristic
//! the central writes to and one that notifies JSON text.

use uuid::{Uuid, uuid};

/// Nordic UART Service UUID.
pub const NUS_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// NUS RX characteristic (central writes to the device).
pub const NUS_RX_CHARACTERISTIC: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// NUS TX characteristic (device notifies the central). Readings arrive here.
pub const NUS_TX_CHARACTERISTIC: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

/// Parse a UUID string as entered by a user (surrounding whitespace ignored).
pub fn parse_uuid(value: &str) -> crate::ParseResult<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|_| crate::ParseError::InvalidUuid(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nus_service_uuid() {
        let expected = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
        assert_eq!(NUS_SERVICE.to_string(), expected);
    }

    #[test]
    fn test_nus_tx_uuid() {
        let expected = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";
        assert_eq!(NUS_TX_CHARACTERISTIC.to_string(), expected);
    }

    #[test]
    fn test_nus_characteristics_share_base() {
        let base = |u: Uuid| u.to_string()[8..].to_string();
        assert_eq!(base(NUS_SERVICE), base(NUS_RX_CHARACTERISTIC));
        assert_eq!(base(NUS_SERVICE), base(NUS_TX_CHARACTERISTIC));
    }

    #[test]
    fn test_parse_uuid_trims_and_accepts_uppercase() {
        let parsed = parse_uuid("  6E400001-B5A3-F393-E0A9-E50E24DCCA9E ").unwrap();
        assert_eq!(parsed, NUS_SERVICE);
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        let err = parse_uuid("not-a-uuid").unwrap_err();
        assert!(err.to_string().contains("not-a-uuid"));
    }
}
