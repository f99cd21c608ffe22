//! Persisted device settings.
//!
//! The HTTP and BLE configurations are kept side by side so switching
//! transports does not lose the other one; the active transport is a
//! separate [`ConnectionType`] blob.

use tracing::info;

use aquamon_store::keys;
use aquamon_types::{BleDeviceConfig, ConnectionType, DeviceConfig, HttpDeviceConfig};

use crate::error::{Error, Result};
use crate::offline::SharedStore;
use crate::util::lock;

/// Read/write access to the device settings blobs.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    store: SharedStore,
}

impl DeviceSettings {
    /// Create a settings handle over `store`.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// The stored HTTP configuration, or the cleared default.
    pub fn http_config(&self) -> Result<HttpDeviceConfig> {
        Ok(lock(&self.store).load_or_default(keys::HTTP_DEVICE)?)
    }

    /// Store an HTTP configuration.
    ///
    /// A configuration marked configured must carry an address and a
    /// numeric port.
    pub fn set_http_config(&self, config: &HttpDeviceConfig) -> Result<()> {
        if config.is_configured {
            if config.ip.trim().is_empty() {
                return Err(Error::invalid_config("device address is empty"));
            }
            if config.port_number().is_none() {
                return Err(Error::invalid_config(format!(
                    "port must be a number between 1 and 65535, got '{}'",
                    config.port
                )));
            }
        }
        lock(&self.store).save(keys::HTTP_DEVICE, config)?;
        info!(url = %config.url(), configured = config.is_configured, "Saved HTTP device settings");
        Ok(())
    }

    /// Reset the HTTP configuration.
    pub fn clear_http_config(&self) -> Result<()> {
        lock(&self.store).save(keys::HTTP_DEVICE, &HttpDeviceConfig::default())?;
        info!("Cleared HTTP device settings");
        Ok(())
    }

    /// The stored BLE configuration, or the cleared default.
    pub fn ble_config(&self) -> Result<BleDeviceConfig> {
        Ok(lock(&self.store).load_or_default(keys::BLE_DEVICE)?)
    }

    /// Store a BLE configuration.
    ///
    /// A configuration marked configured must carry two parseable UUIDs.
    pub fn set_ble_config(&self, config: &BleDeviceConfig) -> Result<()> {
        if config.is_configured {
            config
                .service()
                .and_then(|_| config.characteristic())
                .map_err(|e| Error::invalid_config(e.to_string()))?;
        }
        lock(&self.store).save(keys::BLE_DEVICE, config)?;
        info!(service = %config.service_uuid, configured = config.is_configured, "Saved BLE device settings");
        Ok(())
    }

    /// Reset the BLE configuration.
    pub fn clear_ble_config(&self) -> Result<()> {
        lock(&self.store).save(keys::BLE_DEVICE, &BleDeviceConfig::default())?;
        info!("Cleared BLE device settings");
        Ok(())
    }

    /// The selected transport.
    pub fn connection_type(&self) -> Result<ConnectionType> {
        Ok(lock(&self.store).load_or_default(keys::CONNECTION_TYPE)?)
    }

    /// Select a transport.
    pub fn set_connection_type(&self, connection_type: ConnectionType) -> Result<()> {
        lock(&self.store).save(keys::CONNECTION_TYPE, &connection_type)?;
        info!(%connection_type, "Selected transport");
        Ok(())
    }

    /// The configuration of the selected transport.
    pub fn active_config(&self) -> Result<DeviceConfig> {
        Ok(match self.connection_type()? {
            ConnectionType::Wifi => DeviceConfig::Http(self.http_config()?),
            ConnectionType::Bluetooth => DeviceConfig::Ble(self.ble_config()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::memory_store;

    #[test]
    fn test_defaults_are_cleared_state() {
        let settings = DeviceSettings::new(memory_store());
        let http = settings.http_config().unwrap();
        assert!(!http.is_configured);
        assert_eq!(http.endpoint, "turbidez");
        assert!(!settings.ble_config().unwrap().is_configured);
        assert_eq!(settings.connection_type().unwrap(), ConnectionType::Wifi);
        assert!(!settings.active_config().unwrap().is_valid());
    }

    #[test]
    fn test_http_round_trip_and_clear() {
        let settings = DeviceSettings::new(memory_store());
        let config = HttpDeviceConfig::new("192.168.1.100", "80", "/turbidez");
        settings.set_http_config(&config).unwrap();
        assert_eq!(settings.http_config().unwrap(), config);

        settings.clear_http_config().unwrap();
        assert_eq!(settings.http_config().unwrap(), HttpDeviceConfig::default());
    }

    #[test]
    fn test_rejects_configured_without_address() {
        let settings = DeviceSettings::new(memory_store());
        let mut config = HttpDeviceConfig::default();
        config.is_configured = true;
        assert!(matches!(
            settings.set_http_config(&config),
            Err(Error::InvalidConfig(_))
        ));

        let config = HttpDeviceConfig::new("10.0.0.5", "eighty", "turbidez");
        assert!(settings.set_http_config(&config).is_err());
    }

    #[test]
    fn test_ble_validation() {
        let settings = DeviceSettings::new(memory_store());
        let bad = BleDeviceConfig::new("nope", "6e400003-b5a3-f393-e0a9-e50e24dcca9e", None);
        assert!(matches!(
            settings.set_ble_config(&bad),
            Err(Error::InvalidConfig(_))
        ));

        let good = BleDeviceConfig::nordic_uart(Some("Tanque-1"));
        settings.set_ble_config(&good).unwrap();
        assert_eq!(settings.ble_config().unwrap(), good);
    }

    #[test]
    fn test_active_config_follows_connection_type() {
        let settings = DeviceSettings::new(memory_store());
        settings
            .set_http_config(&HttpDeviceConfig::new("192.168.1.100", "", ""))
            .unwrap();
        settings
            .set_ble_config(&BleDeviceConfig::nordic_uart(None))
            .unwrap();

        assert!(matches!(
            settings.active_config().unwrap(),
            DeviceConfig::Http(_)
        ));
        settings
            .set_connection_type(ConnectionType::Bluetooth)
            .unwrap();
        assert!(matches!(
            settings.active_config().unwrap(),
            DeviceConfig::Ble(_)
        ));
        // The other transport's settings survive the switch
        assert!(settings.http_config().unwrap().is_valid());
    }
}
