//! Bluetooth Low Energy transport.
//!
//! The sensor exposes a Nordic-UART-style service whose TX characteristic
//! notifies UTF-8 JSON (or a bare number) on every measurement. This module
//! scans for peripherals advertising the configured service, lets a
//! [`DevicePicker`] choose one and subscribes to the characteristic. Every
//! decoded notification is broadcast as a [`TransportEvent::Reading`]; the
//! newest one is also kept for [`BleTransport::read`].
//!
//! A background task watches the adapter for `DeviceDisconnected`, resets
//! the transport and broadcasts [`TransportEvent::Disconnected`], so the next
//! connect starts from scratch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use aquamon_types::payload::parse_notification;
use aquamon_types::{BleDeviceConfig, ConnectionType, SensorReading, now_millis};

use crate::error::{Error, Result};
use crate::transport::{DeviceTransport, TransportEvent};
use crate::util::format_peripheral_id;

/// Default time spent scanning for advertising sensors.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);
/// Default timeout for the GATT connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default wait for the next notification in [`BleTransport::read`].
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts for the BLE transport.
#[derive(Debug, Clone)]
pub struct BleOptions {
    /// How long to scan before offering candidates.
    pub scan_duration: Duration,
    /// GATT connect timeout.
    pub connect_timeout: Duration,
    /// Service discovery timeout.
    pub discovery_timeout: Duration,
    /// How long a read waits for a notification.
    pub read_timeout: Duration,
}

impl Default for BleOptions {
    fn default() -> Self {
        Self {
            scan_duration: DEFAULT_SCAN_DURATION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl BleOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.scan_duration.is_zero() {
            return Err(Error::invalid_config("scan_duration must be > 0"));
        }
        if self.connect_timeout.is_zero()
            || self.discovery_timeout.is_zero()
            || self.read_timeout.is_zero()
        {
            return Err(Error::invalid_config("BLE timeouts must be > 0"));
        }
        Ok(())
    }
}

/// A peripheral found while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BleCandidate {
    /// Platform peripheral identifier.
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Result of offering candidates to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerOutcome {
    /// Index into the offered candidates.
    Selected(usize),
    /// The user dismissed the chooser.
    Cancelled,
}

/// Chooses which scanned peripheral to connect to.
///
/// Only called with a non-empty candidate list.
#[async_trait]
pub trait DevicePicker: Send + Sync {
    /// Pick one of `candidates` or cancel.
    async fn pick(&self, candidates: &[BleCandidate]) -> PickerOutcome;
}

/// Picker that takes the candidate with the preferred name, else the
/// strongest signal.
#[derive(Debug, Clone, Default)]
pub struct FirstMatchPicker {
    preferred_name: Option<String>,
}

impl FirstMatchPicker {
    /// Prefer candidates advertising `name`.
    pub fn new(preferred_name: Option<String>) -> Self {
        Self { preferred_name }
    }

    fn choose(&self, candidates: &[BleCandidate]) -> Option<usize> {
        if let Some(wanted) = &self.preferred_name
            && let Some(i) = candidates
                .iter()
                .position(|c| c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(wanted)))
        {
            return Some(i);
        }
        candidates
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| c.rssi.unwrap_or(i16::MIN))
            .map(|(i, _)| i)
    }
}

#[async_trait]
impl DevicePicker for FirstMatchPicker {
    async fn pick(&self, candidates: &[BleCandidate]) -> PickerOutcome {
        match self.choose(candidates) {
            Some(i) => PickerOutcome::Selected(i),
            None => PickerOutcome::Cancelled,
        }
    }
}

struct Session {
    peripheral: Peripheral,
    notify_task: JoinHandle<()>,
    watch_task: JoinHandle<()>,
}

impl Session {
    fn abort_tasks(&self) {
        self.notify_task.abort();
        self.watch_task.abort();
    }
}

struct Shared {
    session: Mutex<Option<Session>>,
    connected: AtomicBool,
    latest: watch::Sender<Option<SensorReading>>,
    events: broadcast::Sender<TransportEvent>,
}

impl Shared {
    fn handle_payload(&self, payload: &[u8]) {
        match parse_notification(payload, now_millis()) {
            Ok(notification) => {
                let reading = notification.into_reading();
                debug!(turbidity = reading.turbidity, "BLE notification");
                self.latest.send_replace(Some(reading.clone()));
                let _ = self.events.send(TransportEvent::Reading(reading));
            }
            Err(e) => warn!(len = payload.len(), "Dropping BLE payload: {}", e),
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.latest.send_replace(None);
        let _ = self.events.send(TransportEvent::Disconnected);
    }
}

/// BLE transport bound to one device configuration.
pub struct BleTransport {
    config: BleDeviceConfig,
    options: BleOptions,
    picker: Arc<dyn DevicePicker>,
    shared: Arc<Shared>,
    reader: Mutex<watch::Receiver<Option<SensorReading>>>,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl BleTransport {
    /// Create a transport using [`FirstMatchPicker`].
    pub fn new(config: BleDeviceConfig, options: BleOptions) -> Result<Self> {
        let picker = Arc::new(FirstMatchPicker::new(config.device_name.clone()));
        Self::with_picker(config, options, picker)
    }

    /// Create a transport with a custom device picker.
    pub fn with_picker(
        config: BleDeviceConfig,
        options: BleOptions,
        picker: Arc<dyn DevicePicker>,
    ) -> Result<Self> {
        options.validate()?;
        let (latest, reader) = watch::channel(None);
        let (events, _) = broadcast::channel(32);
        Ok(Self {
            config,
            options,
            picker,
            shared: Arc::new(Shared {
                session: Mutex::new(None),
                connected: AtomicBool::new(false),
                latest,
                events,
            }),
            reader: Mutex::new(reader),
        })
    }

    /// The bound device configuration.
    pub fn config(&self) -> &BleDeviceConfig {
        &self.config
    }

    /// Whether a GATT link is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Receive every decoded reading and the disconnect notice.
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    /// Connect, subscribe and start receiving notifications.
    ///
    /// Does nothing when already connected.
    #[tracing::instrument(level = "info", skip(self), fields(service = %self.config.service_uuid))]
    pub async fn connect(&self) -> Result<()> {
        if !self.config.is_valid() {
            return Err(Error::not_configured("no Bluetooth service/characteristic set"));
        }
        let service = self
            .config
            .service()
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        let characteristic_uuid = self
            .config
            .characteristic()
            .map_err(|e| Error::invalid_config(e.to_string()))?;

        let mut session = self.shared.session.lock().await;
        if session.is_some() && self.is_connected() {
            return Ok(());
        }

        let adapter = first_adapter().await?;
        let peripheral = self.choose_peripheral(&adapter, service).await?;

        info!("Connecting to sensor...");
        timeout(self.options.connect_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to sensor", self.options.connect_timeout))??;

        timeout(self.options.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.options.discovery_timeout))??;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic_uuid)
            .ok_or_else(|| Error::NotFound(format!("characteristic {characteristic_uuid}")))?;

        peripheral.subscribe(&characteristic).await?;
        let mut notifications = peripheral.notifications().await?;
        let mut central_events = adapter.events().await?;

        let weak = Arc::downgrade(&self.shared);
        let notify_task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic_uuid {
                    continue;
                }
                let Some(shared) = weak.upgrade() else { break };
                shared.handle_payload(&notification.value);
            }
        });

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let peripheral_id = peripheral.id();
        let watch_task = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event
                    && id == peripheral_id
                {
                    let Some(shared) = weak.upgrade() else { break };
                    warn!(device = %format_peripheral_id(&id), "Sensor disconnected");
                    if let Some(session) = shared.session.lock().await.take() {
                        session.notify_task.abort();
                    }
                    shared.mark_disconnected();
                    break;
                }
            }
        });

        *session = Some(Session {
            peripheral,
            notify_task,
            watch_task,
        });
        self.shared.connected.store(true, Ordering::SeqCst);
        info!("Subscribed to sensor notifications");
        Ok(())
    }

    async fn choose_peripheral(&self, adapter: &Adapter, service: uuid::Uuid) -> Result<Peripheral> {
        adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        sleep(self.options.scan_duration).await;
        let peripherals = adapter.peripherals().await?;
        if let Err(e) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        let mut matching = Vec::new();
        for peripheral in peripherals {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let name_matches = match (&props.local_name, &self.config.device_name) {
                (Some(name), Some(wanted)) => name.eq_ignore_ascii_case(wanted),
                _ => false,
            };
            if props.services.contains(&service) || name_matches {
                let candidate = BleCandidate {
                    id: format_peripheral_id(&peripheral.id()),
                    name: props.local_name,
                    rssi: props.rssi,
                };
                matching.push((candidate, peripheral));
            }
        }

        if matching.is_empty() {
            return Err(Error::NotFound(format!(
                "no sensor advertising service {service}"
            )));
        }

        let candidates: Vec<BleCandidate> = matching.iter().map(|(c, _)| c.clone()).collect();
        debug!(count = candidates.len(), "Offering sensors to picker");
        match self.picker.pick(&candidates).await {
            PickerOutcome::Cancelled => Err(Error::UserCancelled),
            PickerOutcome::Selected(i) => matching
                .into_iter()
                .nth(i)
                .map(|(_, p)| p)
                .ok_or_else(|| Error::invalid_config(format!("picker returned index {i}"))),
        }
    }

    /// Close the link if open.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.shared.session.lock().await.take();
        if let Some(session) = session {
            session.abort_tasks();
            self.shared.mark_disconnected();
            session.peripheral.disconnect().await?;
            info!("Disconnected from sensor");
        }
        Ok(())
    }

    /// Whether the link is (or can be brought) up.
    ///
    /// A dismissed picker yields `Ok(false)`.
    pub async fn test_connection(&self) -> Result<bool> {
        if self.is_connected() {
            return Ok(true);
        }
        match self.connect().await {
            Ok(()) => Ok(true),
            Err(Error::UserCancelled) => {
                debug!("Device picker dismissed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Return the newest reading not yet returned, waiting for the next
    /// notification when there is none.
    pub async fn read(&self) -> Result<SensorReading> {
        if !self.is_connected() {
            self.connect().await?;
        }
        let mut reader = self.reader.lock().await;
        if reader.has_changed().unwrap_or(false)
            && let Some(reading) = reader.borrow_and_update().clone()
        {
            return Ok(reading);
        }

        timeout(self.options.read_timeout, reader.changed())
            .await
            .map_err(|_| Error::timeout("wait for notification", self.options.read_timeout))?
            .map_err(|_| Error::Unreachable("sensor link closed".to_string()))?;

        reader
            .borrow_and_update()
            .clone()
            .ok_or_else(|| Error::Unreachable("sensor disconnected".to_string()))
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        let Ok(mut guard) = self.shared.session.try_lock() else {
            return;
        };
        if let Some(session) = guard.take() {
            session.abort_tasks();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = session.peripheral.disconnect().await {
                        debug!("Disconnect on drop failed: {}", e);
                    }
                });
            }
        }
    }
}

/// The first Bluetooth adapter, or a user-displayable reason there is none.
pub async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(|e| {
        Error::BluetoothUnavailable(format!("Bluetooth is not available on this system ({e})"))
    })?;
    let adapters = manager.adapters().await.map_err(|e| {
        Error::BluetoothUnavailable(format!("Bluetooth adapters could not be listed ({e})"))
    })?;
    adapters.into_iter().next().ok_or_else(|| {
        Error::BluetoothUnavailable(
            "No Bluetooth adapter found. Turn Bluetooth on and try again.".to_string(),
        )
    })
}

/// Scan for sensors advertising `service` without connecting.
pub async fn scan(service: uuid::Uuid, duration: Duration) -> Result<Vec<BleCandidate>> {
    let adapter = first_adapter().await?;
    adapter
        .start_scan(ScanFilter {
            services: vec![service],
        })
        .await?;
    sleep(duration).await;
    let peripherals = adapter.peripherals().await?;
    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop scan: {}", e);
    }

    let mut found = Vec::new();
    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await?
            && props.services.contains(&service)
        {
            found.push(BleCandidate {
                id: format_peripheral_id(&peripheral.id()),
                name: props.local_name,
                rssi: props.rssi,
            });
        }
    }
    Ok(found)
}

#[async_trait]
impl DeviceTransport for BleTransport {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Bluetooth
    }

    fn describe(&self) -> String {
        match &self.config.device_name {
            Some(name) => format!("BLE {name}"),
            None => format!("BLE service {}", self.config.service_uuid),
        }
    }

    fn is_configured(&self) -> bool {
        self.config.is_valid()
    }

    async fn test_connection(&self) -> Result<bool> {
        BleTransport::test_connection(self).await
    }

    async fn read(&self) -> Result<SensorReading> {
        BleTransport::read(self).await
    }

    async fn disconnect(&self) -> Result<()> {
        BleTransport::disconnect(self).await
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<TransportEvent>> {
        Some(self.events())
    }
}
