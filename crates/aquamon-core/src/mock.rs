//! Mock transport for testing and demo mode.
//!
//! [`MockTransport`] implements [`DeviceTransport`] without any network or
//! Bluetooth hardware.
//!
//! # Features
//!
//! - **Failure injection**: fail every read, or only the next N reads
//! - **Latency simulation**: delay reads (honours paused tokio time)
//! - **Scripted readings**: queue exact results for successive reads
//! - **Call accounting**: total reads and peak concurrent reads
//! - **Push mode**: behave like a notifying BLE sensor and emit readings on
//!   demand

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use aquamon_types::{ConnectionType, SensorReading, now_millis};

use crate::error::{Error, Result};
use crate::transport::{DeviceTransport, TransportEvent};
use crate::util::lock;

/// Failure a mock read should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Bounded wait exceeded.
    Timeout,
    /// Network-level failure.
    Unreachable,
    /// Endpoint missing.
    NotFound,
    /// Body lacks a turbidity value.
    Malformed,
    /// Device picker dismissed.
    Cancelled,
}

impl MockFailure {
    fn to_error(self, id: &str) -> Error {
        match self {
            Self::Timeout => Error::timeout(format!("read {id}"), Duration::from_secs(5)),
            Self::Unreachable => Error::Unreachable(format!("{id}: connection refused")),
            Self::NotFound => Error::NotFound(format!("{id} returned 404")),
            Self::Malformed => aquamon_types::ParseError::MissingField("turbidez").into(),
            Self::Cancelled => Error::UserCancelled,
        }
    }
}

/// A scripted outcome.
pub type MockOutcome = std::result::Result<SensorReading, MockFailure>;

/// A transport that serves canned readings.
///
/// # Example
///
/// ```
/// use aquamon_core::{DeviceTransport, MockTransport};
/// use aquamon_types::SensorReading;
///
/// #[tokio::main]
/// async fn main() {
///     let mock = MockTransport::new();
///     mock.push_reading(SensorReading::new(45.0, 0));
///     assert_eq!(mock.read().await.unwrap().turbidity, 45.0);
///     assert_eq!(mock.read_count(), 1);
/// }
/// ```
pub struct MockTransport {
    id: String,
    connection_type: ConnectionType,
    configured: AtomicBool,
    connected: AtomicBool,
    reading: Mutex<SensorReading>,
    script: Mutex<VecDeque<MockOutcome>>,
    read_count: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    should_fail: AtomicBool,
    failure: Mutex<MockFailure>,
    /// Simulated read latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    /// Number of reads to fail before succeeding.
    remaining_failures: AtomicU32,
    /// Set in push mode.
    events: Option<broadcast::Sender<TransportEvent>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("id", &self.id)
            .field("connection_type", &self.connection_type)
            .field("read_count", &self.read_count())
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    /// Create a configured Wi-Fi mock returning a clear-water reading.
    pub fn new() -> Self {
        Self {
            id: format!("MOCK-{:06X}", rand::random::<u32>() % 0xFFFFFF),
            connection_type: ConnectionType::Wifi,
            configured: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            reading: Mutex::new(Self::default_reading()),
            script: Mutex::new(VecDeque::new()),
            read_count: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
            failure: Mutex::new(MockFailure::Unreachable),
            latency_ms: AtomicU64::new(0),
            remaining_failures: AtomicU32::new(0),
            events: None,
        }
    }

    fn default_reading() -> SensorReading {
        SensorReading::new(12.0, 0)
            .with_temperature(26.0)
            .with_ph(7.1)
            .with_level("normal")
    }

    /// Report as a different transport.
    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    /// Act as a push transport: connecting is a test read, after which
    /// readings arrive only through [`MockTransport::emit_reading`].
    pub fn push_mode(mut self) -> Self {
        let (events, _) = broadcast::channel(64);
        self.events = Some(events);
        self.connection_type = ConnectionType::Bluetooth;
        self
    }

    /// Push a reading to subscribers, as a notification would.
    ///
    /// Returns `false` outside push mode or when nobody listens.
    pub fn emit_reading(&self, reading: SensorReading) -> bool {
        self.emit(TransportEvent::Reading(reading))
    }

    /// Report a dropped link to subscribers.
    pub fn emit_disconnect(&self) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected)
    }

    fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .as_ref()
            .is_some_and(|events| events.send(event).is_ok())
    }

    /// The generated mock identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set the reading returned when nothing is scripted.
    pub fn set_reading(&self, reading: SensorReading) {
        *lock(&self.reading) = reading;
    }

    /// Queue a successful read.
    pub fn push_reading(&self, reading: SensorReading) {
        lock(&self.script).push_back(Ok(reading));
    }

    /// Queue a failed read.
    pub fn push_failure(&self, failure: MockFailure) {
        lock(&self.script).push_back(Err(failure));
    }

    /// Make every read fail with `failure` (or stop failing).
    pub fn set_should_fail(&self, fail: bool, failure: MockFailure) {
        *lock(&self.failure) = failure;
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` reads, then recover.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every read by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Mark the mock as (un)configured.
    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    /// Number of reads started.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Highest number of reads that were in progress at once.
    pub fn max_concurrent_reads(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Whether a read has succeeded since the last disconnect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn simulate_read(&self) -> Result<SensorReading> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.configured.load(Ordering::SeqCst) {
            return Err(Error::not_configured("mock transport unconfigured"));
        }

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MockFailure::Unreachable.to_error(&self.id));
        }

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(lock(&self.failure).to_error(&self.id));
        }

        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(Ok(reading)) => Ok(reading),
            Some(Err(failure)) => Err(failure.to_error(&self.id)),
            None => {
                let mut reading = lock(&self.reading).clone();
                reading.timestamp = now_millis();
                Ok(reading)
            }
        }
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn describe(&self) -> String {
        format!("mock sensor {}", self.id)
    }

    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn test_connection(&self) -> Result<bool> {
        let result = self.read().await;
        if self.events.is_none() {
            return Ok(result.is_ok());
        }
        // Push transports report real failures and only swallow a cancel
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_user_cancelled() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read(&self) -> Result<SensorReading> {
        let result = self.simulate_read().await;
        self.connected.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnected);
        }
        Ok(())
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<TransportEvent>> {
        self.events.as_ref().map(broadcast::Sender::subscribe)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_default_reading() {
        let mock = MockTransport::new();
        let reading = mock.read().await.unwrap();
        assert_eq!(reading.turbidity, 12.0);
        assert!(reading.timestamp > 0);
        assert!(mock.is_connected());
        assert!(mock.id().starts_with("MOCK-"));
    }

    #[tokio::test]
    async fn test_script_is_consumed_in_order() {
        let mock = MockTransport::new();
        mock.push_reading(SensorReading::new(45.0, 1));
        mock.push_failure(MockFailure::Timeout);
        mock.push_reading(SensorReading::new(50.0, 2));

        assert_eq!(mock.read().await.unwrap().turbidity, 45.0);
        assert!(matches!(mock.read().await, Err(Error::Timeout { .. })));
        assert!(!mock.is_connected());
        assert_eq!(mock.read().await.unwrap().turbidity, 50.0);
        assert_eq!(mock.read().await.unwrap().turbidity, 12.0);
        assert_eq!(mock.read_count(), 4);
    }

    #[tokio::test]
    async fn test_should_fail() {
        let mock = MockTransport::new();
        mock.set_should_fail(true, MockFailure::NotFound);
        assert!(matches!(mock.read().await, Err(Error::NotFound(_))));
        assert!(!mock.test_connection().await.unwrap());

        mock.set_should_fail(false, MockFailure::NotFound);
        assert!(mock.test_connection().await.unwrap());
    }

    #[tokio::test]
    async fn test_transient_failures() {
        let mock = MockTransport::new();
        mock.set_transient_failures(2);
        assert!(mock.read().await.is_err());
        assert!(mock.read().await.is_err());
        assert!(mock.read().await.is_ok());
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let mock = MockTransport::new();
        mock.set_configured(false);
        assert!(!mock.is_configured());
        assert!(matches!(mock.read().await, Err(Error::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_cancelled_maps_to_user_cancelled() {
        let mock = MockTransport::new().with_connection_type(ConnectionType::Bluetooth);
        mock.push_failure(MockFailure::Cancelled);
        assert!(mock.read().await.unwrap_err().is_user_cancelled());
        assert_eq!(mock.connection_type(), ConnectionType::Bluetooth);
    }

    #[tokio::test]
    async fn test_push_mode_emits_events() {
        let polled = MockTransport::new();
        assert!(polled.subscribe_events().is_none());
        assert!(!polled.emit_reading(SensorReading::new(1.0, 0)));

        let mock = MockTransport::new().push_mode();
        assert_eq!(mock.connection_type(), ConnectionType::Bluetooth);
        let mut events = mock.subscribe_events().unwrap();
        assert!(mock.test_connection().await.unwrap());

        assert!(mock.emit_reading(SensorReading::new(8.0, 1)));
        assert!(mock.emit_disconnect());
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Reading(SensorReading::new(8.0, 1))
        );
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Disconnected);
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn test_push_mode_connect_failure_is_an_error() {
        let mock = MockTransport::new().push_mode();
        mock.push_failure(MockFailure::NotFound);
        assert!(matches!(
            mock.test_connection().await,
            Err(Error::NotFound(_))
        ));

        mock.push_failure(MockFailure::Cancelled);
        assert!(!mock.test_connection().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_accounting() {
        let mock = Arc::new(MockTransport::new());
        mock.set_latency(Duration::from_secs(1));

        let a = tokio::spawn({
            let mock = Arc::clone(&mock);
            async move { mock.read().await }
        });
        let b = tokio::spawn({
            let mock = Arc::clone(&mock);
            async move { mock.read().await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(mock.read_count(), 2);
        assert_eq!(mock.max_concurrent_reads(), 2);
    }
}
