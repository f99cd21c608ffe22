//! Application root.
//!
//! [`Monitor`] owns every long-lived piece of the connectivity core: the
//! store, device settings, both offline caches, the event bus, the
//! connection coordinator, the sync reconciler and the network monitor.
//! Nothing here is global; binaries create one `Monitor` and hand out
//! references.
//!
//! Configuration changes are pushed: saving device settings through the
//! monitor rebuilds the transport and restarts the coordinator at once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use aquamon_store::Store;
use aquamon_types::{BleDeviceConfig, ConnectionType, DeviceConfig, HttpDeviceConfig};

use crate::auth::OfflineAuthCache;
use crate::ble::{BleOptions, BleTransport, DevicePicker};
use crate::coordinator::{ConnectionCoordinator, CoordinatorOptions};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::http::{HttpTransport, HttpTransportOptions};
use crate::network::NetworkMonitor;
use crate::notify::{LogNotifier, Notifier};
use crate::offline::{OfflineDataCache, SharedStore};
use crate::settings::DeviceSettings;
use crate::sync::{HttpUploader, ReadingUploader, SYNC_STATUS_DISPLAY, SyncReconciler, SyncReport};
use crate::transport::DeviceTransport;
use crate::util::lock;

/// Options for [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Coordinator timing.
    pub coordinator: CoordinatorOptions,
    /// HTTP transport options (relay, timeouts).
    pub http: HttpTransportOptions,
    /// BLE transport options.
    pub ble: BleOptions,
    /// Base URL of the readings API; no sync without it.
    pub api_url: Option<String>,
    /// Bypass authentication.
    pub unauthenticated_dev_mode: bool,
    /// How long the final sync status stays visible.
    pub sync_status_display: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorOptions::default(),
            http: HttpTransportOptions::default(),
            ble: BleOptions::default(),
            api_url: None,
            unauthenticated_dev_mode: false,
            sync_status_display: SYNC_STATUS_DISPLAY,
        }
    }
}

/// Builds a transport for a device configuration.
pub trait TransportFactory: Send + Sync {
    /// Create a transport bound to `config`.
    fn build(&self, config: &DeviceConfig) -> Result<Arc<dyn DeviceTransport>>;
}

/// Factory producing [`HttpTransport`] and [`BleTransport`].
pub struct DefaultTransportFactory {
    http: HttpTransportOptions,
    ble: BleOptions,
    picker: Option<Arc<dyn DevicePicker>>,
}

impl DefaultTransportFactory {
    /// Create a factory with the given transport options.
    pub fn new(http: HttpTransportOptions, ble: BleOptions) -> Self {
        Self {
            http,
            ble,
            picker: None,
        }
    }

    /// Use `picker` to choose BLE devices.
    pub fn with_picker(mut self, picker: Arc<dyn DevicePicker>) -> Self {
        self.picker = Some(picker);
        self
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn build(&self, config: &DeviceConfig) -> Result<Arc<dyn DeviceTransport>> {
        Ok(match config {
            DeviceConfig::Http(c) => Arc::new(HttpTransport::new(c.clone(), self.http.clone())?),
            DeviceConfig::Ble(c) => match &self.picker {
                Some(picker) => Arc::new(BleTransport::with_picker(
                    c.clone(),
                    self.ble.clone(),
                    Arc::clone(picker),
                )?),
                None => Arc::new(BleTransport::new(c.clone(), self.ble.clone())?),
            },
        })
    }
}

/// Builder for [`Monitor`].
#[derive(Default)]
pub struct MonitorBuilder {
    options: MonitorOptions,
    factory: Option<Arc<dyn TransportFactory>>,
    notifier: Option<Arc<dyn Notifier>>,
    uploader: Option<Arc<dyn ReadingUploader>>,
    network: Option<NetworkMonitor>,
}

impl MonitorBuilder {
    /// Set the options.
    pub fn options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom transport factory.
    pub fn factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Send notifications to `notifier`.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Upload saved readings with `uploader` instead of the HTTP API.
    pub fn uploader(mut self, uploader: Arc<dyn ReadingUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Share an existing network monitor.
    pub fn network(mut self, network: NetworkMonitor) -> Self {
        self.network = Some(network);
        self
    }

    /// Assemble the monitor over `store`.
    pub fn build(self, store: Store) -> Result<Monitor> {
        let options = self.options;
        let store: SharedStore = Arc::new(Mutex::new(store));
        let events = EventBus::default();
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));

        let offline = OfflineDataCache::new(Arc::clone(&store));
        let auth = OfflineAuthCache::new(Arc::clone(&store))
            .unauthenticated_dev_mode(options.unauthenticated_dev_mode);
        let settings = DeviceSettings::new(Arc::clone(&store));

        let coordinator = ConnectionCoordinator::builder()
            .options(options.coordinator.clone())
            .events(events.clone())
            .notifier(Arc::clone(&notifier))
            .cache(offline.clone())
            .build()?;

        let uploader = match (self.uploader, &options.api_url) {
            (Some(uploader), _) => Some(uploader),
            (None, Some(url)) => Some(Arc::new(HttpUploader::new(url)?) as Arc<dyn ReadingUploader>),
            (None, None) => None,
        };
        let reconciler = uploader.map(|uploader| {
            SyncReconciler::new(offline.clone(), uploader)
                .with_events(events.clone())
                .with_notifier(Arc::clone(&notifier))
                .display_delay(options.sync_status_display)
        });

        let network = self
            .network
            .unwrap_or_default()
            .with_events(events.clone());
        let factory = self.factory.unwrap_or_else(|| {
            Arc::new(DefaultTransportFactory::new(
                options.http.clone(),
                options.ble.clone(),
            ))
        });

        Ok(Monitor {
            store,
            settings,
            offline,
            auth,
            events,
            coordinator,
            reconciler,
            network,
            factory,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// The connectivity core, wired together.
pub struct Monitor {
    store: SharedStore,
    settings: DeviceSettings,
    offline: OfflineDataCache,
    auth: OfflineAuthCache,
    events: EventBus,
    coordinator: ConnectionCoordinator,
    reconciler: Option<SyncReconciler>,
    network: NetworkMonitor,
    factory: Arc<dyn TransportFactory>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("coordinator", &self.coordinator)
            .field("online", &self.network.is_online())
            .field("sync", &self.reconciler.is_some())
            .finish()
    }
}

impl Monitor {
    /// Start building a monitor.
    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::default()
    }

    /// Shared store handle.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Device settings.
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Offline data cache.
    pub fn offline(&self) -> &OfflineDataCache {
        &self.offline
    }

    /// Offline auth cache.
    pub fn auth(&self) -> &OfflineAuthCache {
        &self.auth
    }

    /// Event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Connection coordinator.
    pub fn coordinator(&self) -> &ConnectionCoordinator {
        &self.coordinator
    }

    /// Sync reconciler, when an API is configured.
    pub fn reconciler(&self) -> Option<&SyncReconciler> {
        self.reconciler.as_ref()
    }

    /// Network monitor.
    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Connect with the persisted configuration and start background work.
    pub fn start(&self) -> Result<()> {
        if let Some(reconciler) = &self.reconciler {
            let handle = reconciler.watch_network(&self.network, self.cancel.child_token());
            lock(&self.tasks).push(handle);
        }
        self.restart()
    }

    /// Probe `url` for connectivity every `interval`.
    pub fn start_probe(&self, url: String, interval: Duration) {
        let handle = self.network.spawn_probe(
            reqwest::Client::new(),
            url,
            interval,
            self.cancel.child_token(),
        );
        lock(&self.tasks).push(handle);
    }

    /// Rebuild the transport from the persisted settings and restart the
    /// coordinator.
    pub fn restart(&self) -> Result<()> {
        let config = self.settings.active_config()?;
        if !config.is_valid() {
            info!(%config, "No usable device configuration");
            self.coordinator.configure(None);
            return Ok(());
        }
        let transport = match self.factory.build(&config) {
            Ok(transport) => transport,
            Err(e) => {
                self.coordinator.configure(None);
                return Err(e);
            }
        };
        info!(%config, "Starting connection");
        self.coordinator.configure(Some(transport));
        Ok(())
    }

    /// Save the HTTP configuration and restart if Wi-Fi is active.
    pub fn apply_http_config(&self, config: &HttpDeviceConfig) -> Result<()> {
        self.settings.set_http_config(config)?;
        if self.settings.connection_type()? == ConnectionType::Wifi {
            self.restart()?;
        }
        Ok(())
    }

    /// Save the BLE configuration and restart if Bluetooth is active.
    pub fn apply_ble_config(&self, config: &BleDeviceConfig) -> Result<()> {
        self.settings.set_ble_config(config)?;
        if self.settings.connection_type()? == ConnectionType::Bluetooth {
            self.restart()?;
        }
        Ok(())
    }

    /// Switch transports and restart.
    pub fn use_connection(&self, connection_type: ConnectionType) -> Result<()> {
        self.settings.set_connection_type(connection_type)?;
        self.restart()
    }

    /// Clear the settings of `connection_type` and restart.
    pub fn clear_config(&self, connection_type: ConnectionType) -> Result<()> {
        match connection_type {
            ConnectionType::Wifi => self.settings.clear_http_config()?,
            ConnectionType::Bluetooth => self.settings.clear_ble_config()?,
        }
        self.restart()
    }

    /// Queue a manual reading; sync in the background when online.
    pub fn save_reading(
        &self,
        reading: aquamon_types::SensorReading,
        tank: Option<String>,
        notes: Option<String>,
    ) -> Result<String> {
        let id = self.offline.save_entry(reading, tank, notes)?;
        if self.network.is_online()
            && let Some(reconciler) = self.reconciler.clone()
        {
            tokio::spawn(async move {
                reconciler.sync().await;
            });
        }
        Ok(id)
    }

    /// Drain the offline queue now.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        match &self.reconciler {
            Some(reconciler) => Ok(reconciler.sync().await),
            None => Err(Error::not_configured("no API URL for sync")),
        }
    }

    /// Stop polling and background tasks.
    pub async fn shutdown(&self) {
        self.coordinator.stop();
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                debug!("Background task ended abnormally: {}", e);
            }
        }
        info!("Monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use aquamon_types::{ConnectionState, SensorReading};

    #[derive(Default)]
    struct MockFactory {
        built: Mutex<Vec<DeviceConfig>>,
    }

    impl TransportFactory for MockFactory {
        fn build(&self, config: &DeviceConfig) -> Result<Arc<dyn DeviceTransport>> {
            self.built.lock().unwrap().push(config.clone());
            let mock = MockTransport::new().with_connection_type(config.connection_type());
            if let DeviceConfig::Http(c) = config {
                mock.set_reading(SensorReading::new(c.port_number().unwrap_or(0) as f64, 0));
            }
            Ok(Arc::new(mock))
        }
    }

    fn monitor() -> (Monitor, Arc<MockFactory>) {
        let factory = Arc::new(MockFactory::default());
        let monitor = Monitor::builder()
            .factory(factory.clone())
            .build(Store::open_in_memory().unwrap())
            .unwrap();
        (monitor, factory)
    }

    async fn wait_for(monitor: &Monitor, target: ConnectionState) {
        let mut rx = monitor.coordinator().watch_state();
        tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_config_is_not_configured() {
        let (monitor, factory) = monitor();
        monitor.start().unwrap();
        assert_eq!(monitor.coordinator().state(), ConnectionState::NotConfigured);
        assert!(factory.built.lock().unwrap().is_empty());
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_http_config_restarts() {
        let (monitor, factory) = monitor();
        monitor.start().unwrap();

        monitor
            .apply_http_config(&HttpDeviceConfig::new("192.168.1.100", "80", "turbidez"))
            .unwrap();
        wait_for(&monitor, ConnectionState::Connected).await;
        assert_eq!(monitor.coordinator().latest().unwrap().turbidity, 80.0);

        monitor
            .apply_http_config(&HttpDeviceConfig::new("192.168.1.100", "81", "turbidez"))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(monitor.coordinator().latest().unwrap().turbidity, 81.0);
        assert_eq!(factory.built.lock().unwrap().len(), 2);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ble_config_ignored_while_wifi_active() {
        let (monitor, factory) = monitor();
        monitor
            .apply_ble_config(&BleDeviceConfig::nordic_uart(None))
            .unwrap();
        assert!(factory.built.lock().unwrap().is_empty());

        monitor.use_connection(ConnectionType::Bluetooth).unwrap();
        assert!(matches!(
            factory.built.lock().unwrap()[0],
            DeviceConfig::Ble(_)
        ));
        wait_for(&monitor, ConnectionState::Connected).await;
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_config_goes_not_configured() {
        let (monitor, _) = monitor();
        monitor
            .apply_http_config(&HttpDeviceConfig::new("10.0.0.2", "80", ""))
            .unwrap();
        wait_for(&monitor, ConnectionState::Connected).await;

        monitor.clear_config(ConnectionType::Wifi).unwrap();
        assert_eq!(monitor.coordinator().state(), ConnectionState::NotConfigured);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_requires_api() {
        let (monitor, _) = monitor();
        assert!(monitor.reconciler().is_none());
        assert!(matches!(
            monitor.sync_now().await,
            Err(Error::NotConfigured(_))
        ));
        let id = monitor
            .save_reading(SensorReading::new(3.0, 1), None, None)
            .unwrap();
        assert_eq!(monitor.offline().get_unsynced_readings().unwrap()[0].id, id);
    }
}
