//! Connection state coordinator.
//!
//! Owns the connection state machine and the polling loop for the active
//! transport:
//!
//! ```text
//!  not-configured ──configure──▶ testing ──read ok──▶ connected ◀─┐
//!        ▲                          │                   │   poll ok
//!        └──────retry/configure─────┤ read failed       │ poll failed
//!                                   ▼                   ▼
//!                                 failed ◀──────────────┘
//!  any ──stop──▶ stopped
//! ```
//!
//! Every successful read updates the latest reading, mirrors it into the
//! offline cache and is published to subscribers in registration order.
//! Failures never escape as errors: they become a transition to `failed`
//! with the classified reason attached.
//!
//! At most one read per session is in flight. A tick that finds a read
//! still running does nothing; the next tick is the retry. Each
//! [`ConnectionCoordinator::configure`] starts a new session, and results
//! belonging to an older session are discarded.
//!
//! Push transports (see [`DeviceTransport::subscribe_events`]) are not
//! polled. A successful `test_connection` moves them to `connected`; after
//! that every pushed reading is published as it arrives, and a pushed
//! disconnect moves to `failed`. A quiet but linked sensor stays connected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aquamon_types::{ConnectionState, SensorReading};

use crate::error::{Error, Result};
use crate::events::{EventBus, EventReceiver, MonitorEvent, SubscriptionId};
use crate::notify::{LogNotifier, Notification, NotificationKind, NotificationThrottle, Notifier};
use crate::offline::OfflineDataCache;
use crate::transport::{DeviceTransport, TransportEvent};
use crate::util::lock;

/// Default time between polls while connected.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum time between two configuration prompts.
pub const CONFIG_PROMPT_THROTTLE: Duration = Duration::from_secs(30);

/// Coordinator timing.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Time between polls while connected.
    pub poll_interval: Duration,
    /// Minimum time between configuration prompts.
    pub prompt_throttle: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            prompt_throttle: CONFIG_PROMPT_THROTTLE,
        }
    }
}

impl CoordinatorOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the configuration prompt throttle.
    pub fn prompt_throttle(mut self, period: Duration) -> Self {
        self.prompt_throttle = period;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_config("poll_interval must be > 0"));
        }
        Ok(())
    }
}

/// What a single poll did.
#[derive(Debug)]
pub enum PollOutcome {
    /// A read was already in flight for this session.
    Skipped,
    /// No session, or the state does not poll (failed, stopped).
    Inactive,
    /// The session changed while the read was in flight.
    Discarded,
    /// The read succeeded.
    Success(SensorReading),
    /// A push transport linked up; readings follow as they are pushed.
    Linked,
    /// The read failed.
    Failure(Error),
}

struct Session {
    generation: u64,
    transport: Arc<dyn DeviceTransport>,
    description: String,
    in_flight: Arc<AtomicBool>,
    polling: Option<CancellationToken>,
    pushes: bool,
}

impl Session {
    fn stop_polling(&mut self) {
        if let Some(token) = self.polling.take() {
            token.cancel();
        }
    }
}

struct State {
    connection: ConnectionState,
    generation: u64,
    session: Option<Session>,
    latest: Option<SensorReading>,
    prompt: NotificationThrottle,
}

struct Inner {
    state: Mutex<State>,
    state_tx: watch::Sender<ConnectionState>,
    options: CoordinatorOptions,
    events: EventBus,
    notifier: Arc<dyn Notifier>,
    cache: Option<OfflineDataCache>,
}

/// Builder for [`ConnectionCoordinator`].
#[derive(Default)]
pub struct CoordinatorBuilder {
    options: CoordinatorOptions,
    events: Option<EventBus>,
    notifier: Option<Arc<dyn Notifier>>,
    cache: Option<OfflineDataCache>,
}

impl CoordinatorBuilder {
    /// Set the timing options.
    pub fn options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Publish on `bus`.
    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Send notifications to `notifier`.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Mirror readings into `cache`.
    pub fn cache(mut self, cache: OfflineDataCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the coordinator in the `not-configured` state.
    pub fn build(self) -> Result<ConnectionCoordinator> {
        self.options.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::NotConfigured);
        Ok(ConnectionCoordinator {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    connection: ConnectionState::NotConfigured,
                    generation: 0,
                    session: None,
                    latest: None,
                    prompt: NotificationThrottle::new(self.options.prompt_throttle),
                }),
                state_tx,
                options: self.options,
                events: self.events.unwrap_or_default(),
                notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
                cache: self.cache,
            }),
        })
    }
}

/// Clears the in-flight flag when a read finishes or is dropped.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What a successful check produced.
enum Check {
    Reading(SensorReading),
    Linked(broadcast::Receiver<TransportEvent>),
}

/// Side effects collected under the state lock and run after releasing it.
#[derive(Default)]
struct Effects {
    events: Vec<MonitorEvent>,
    notifications: Vec<Notification>,
}

/// Drives one transport through the connection state machine.
///
/// Cloning is cheap and every clone controls the same state. Methods that
/// start reads spawn tasks and must be called within a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCoordinator")
            .field("state", &self.state())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl ConnectionCoordinator {
    /// Start building a coordinator.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.state).connection
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The most recent successful reading.
    pub fn latest(&self) -> Option<SensorReading> {
        lock(&self.inner.state).latest.clone()
    }

    /// Description of the active transport.
    pub fn target(&self) -> Option<String> {
        lock(&self.inner.state)
            .session
            .as_ref()
            .map(|s| s.description.clone())
    }

    /// Register a reading callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SensorReading) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    /// Remove a reading callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Receive all monitor events.
    pub fn events(&self) -> EventReceiver {
        self.inner.events.events()
    }

    fn transition(
        &self,
        state: &mut State,
        to: ConnectionState,
        reason: Option<String>,
        effects: &mut Effects,
    ) {
        let from = state.connection;
        if from == to {
            return;
        }
        state.connection = to;
        self.inner.state_tx.send_replace(to);
        info!(%from, %to, reason = reason.as_deref().unwrap_or(""), "Connection state changed");
        effects
            .events
            .push(MonitorEvent::StateChanged { from, to, reason });
    }

    fn run(&self, effects: Effects) {
        for event in effects.events {
            self.inner.events.emit(event);
        }
        for notification in effects.notifications {
            self.inner.notifier.notify(&notification);
            self.inner
                .events
                .emit(MonitorEvent::Notification { notification });
        }
    }

    fn prompt_for_configuration(&self, state: &mut State, effects: &mut Effects) {
        if state.prompt.allow() {
            effects.notifications.push(Notification::new(
                NotificationKind::ConfigurationRequired,
                "Set up the sensor connection to see live readings.",
            ));
        } else {
            debug!("Configuration prompt throttled");
        }
    }

    fn end_session(state: &mut State) -> Option<Arc<dyn DeviceTransport>> {
        state.generation += 1;
        state.session.take().map(|mut session| {
            session.stop_polling();
            session.transport
        })
    }

    fn release(transport: Option<Arc<dyn DeviceTransport>>) {
        if let Some(transport) = transport {
            tokio::spawn(async move {
                if let Err(e) = transport.disconnect().await {
                    debug!("Disconnect of previous transport failed: {}", e);
                }
            });
        }
    }

    /// Switch to `transport` and test it.
    ///
    /// `None`, or a transport without a usable configuration, moves to
    /// `not-configured` and raises a (throttled) setup prompt.
    pub fn configure(&self, transport: Option<Arc<dyn DeviceTransport>>) {
        let mut effects = Effects::default();
        let (old, generation) = {
            let mut state = lock(&self.inner.state);
            let old = Self::end_session(&mut state);
            let generation = state.generation;

            match transport.filter(|t| t.is_configured()) {
                None => {
                    self.transition(&mut state, ConnectionState::NotConfigured, None, &mut effects);
                    self.prompt_for_configuration(&mut state, &mut effects);
                    (old, None)
                }
                Some(transport) => {
                    let description = transport.describe();
                    let pushes = transport.subscribe_events().is_some();
                    info!(target = %description, "Testing sensor connection");
                    state.session = Some(Session {
                        generation,
                        transport,
                        description,
                        in_flight: Arc::new(AtomicBool::new(false)),
                        polling: None,
                        pushes,
                    });
                    self.transition(&mut state, ConnectionState::Testing, None, &mut effects);
                    (old, Some(generation))
                }
            }
        };
        self.run(effects);
        Self::release(old);
        if let Some(generation) = generation {
            self.spawn_check(generation);
        }
    }

    /// Test the current transport again after a failure.
    ///
    /// Returns whether a check was started.
    pub fn retry(&self) -> bool {
        let mut effects = Effects::default();
        let generation = {
            let mut state = lock(&self.inner.state);
            match state.connection {
                ConnectionState::Failed | ConnectionState::NotConfigured => {}
                other => {
                    debug!(state = %other, "Retry ignored");
                    return false;
                }
            }
            if state.session.is_none() {
                self.prompt_for_configuration(&mut state, &mut effects);
                None
            } else {
                state.generation += 1;
                let generation = state.generation;
                if let Some(session) = state.session.as_mut() {
                    session.stop_polling();
                    session.generation = generation;
                    session.in_flight = Arc::new(AtomicBool::new(false));
                }
                self.transition(&mut state, ConnectionState::Testing, None, &mut effects);
                Some(generation)
            }
        };
        self.run(effects);
        match generation {
            Some(generation) => {
                self.spawn_check(generation);
                true
            }
            None => false,
        }
    }

    /// Stop polling. Reads already in flight finish but are ignored.
    pub fn stop(&self) {
        let mut effects = Effects::default();
        let old = {
            let mut state = lock(&self.inner.state);
            let old = Self::end_session(&mut state);
            self.transition(&mut state, ConnectionState::Stopped, None, &mut effects);
            old
        };
        self.run(effects);
        Self::release(old);
    }

    fn spawn_check(&self, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            this.poll_generation(Some(generation)).await;
        });
    }

    fn spawn_polling(&self, generation: u64, cancel: CancellationToken) {
        let this = self.clone();
        let period = self.inner.options.poll_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(generation, "Polling loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Each tick runs detached so a slow read cannot delay the
                        // schedule; the in-flight flag turns overlapping ticks into no-ops.
                        let this = this.clone();
                        tokio::spawn(async move {
                            this.poll_generation(Some(generation)).await;
                        });
                    }
                }
            }
        });
    }

    fn spawn_forwarding(
        &self,
        generation: u64,
        cancel: CancellationToken,
        mut events: broadcast::Receiver<TransportEvent>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(generation, "Event forwarding stopped");
                        break;
                    }
                    event = events.recv() => event,
                };
                let outcome = match event {
                    Ok(TransportEvent::Reading(reading)) => {
                        this.accept(generation, Some(reading), None)
                    }
                    Ok(TransportEvent::Disconnected) => this.reject(
                        generation,
                        Error::Unreachable("sensor disconnected".to_string()),
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sensor readings arrived faster than they were published");
                        continue;
                    }
                    Err(RecvError::Closed) => this.reject(
                        generation,
                        Error::Unreachable("sensor link closed".to_string()),
                    ),
                };
                if !matches!(outcome, PollOutcome::Success(_)) {
                    break;
                }
            }
        });
    }

    /// Run one check against the current transport.
    ///
    /// For a push transport this only does something while `testing`.
    pub async fn poll_once(&self) -> PollOutcome {
        self.poll_generation(None).await
    }

    async fn poll_generation(&self, expected: Option<u64>) -> PollOutcome {
        let (generation, transport, in_flight) = {
            let state = lock(&self.inner.state);
            let Some(session) = state.session.as_ref() else {
                return PollOutcome::Inactive;
            };
            if expected.is_some_and(|g| g != session.generation) {
                return PollOutcome::Discarded;
            }
            let polls = match state.connection {
                ConnectionState::Testing => true,
                ConnectionState::Connected => !session.pushes,
                _ => false,
            };
            if !polls {
                return PollOutcome::Inactive;
            }
            (
                session.generation,
                Arc::clone(&session.transport),
                Arc::clone(&session.in_flight),
            )
        };

        if in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(generation, "Read in flight; skipping tick");
            return PollOutcome::Skipped;
        }
        let _guard = InFlightGuard(in_flight);

        let result = match transport.subscribe_events() {
            Some(events) => match transport.test_connection().await {
                Ok(true) => Ok(Check::Linked(events)),
                Ok(false) => Err(Error::UserCancelled),
                Err(e) => Err(e),
            },
            None => transport.read().await.map(Check::Reading),
        };
        match result {
            Ok(Check::Reading(reading)) => self.accept(generation, Some(reading), None),
            Ok(Check::Linked(events)) => self.accept(generation, None, Some(events)),
            Err(e) => self.reject(generation, e),
        }
    }

    /// Take a reading (or a fresh push link) for session `generation`.
    fn accept(
        &self,
        generation: u64,
        reading: Option<SensorReading>,
        events: Option<broadcast::Receiver<TransportEvent>>,
    ) -> PollOutcome {
        let mut effects = Effects::default();
        let mut start = None;

        {
            let mut state = lock(&self.inner.state);
            if !Self::is_current(&state, generation)
                || !matches!(
                    state.connection,
                    ConnectionState::Testing | ConnectionState::Connected
                )
            {
                debug!(generation, "Discarding result from previous session");
                return PollOutcome::Discarded;
            }

            if let Some(reading) = &reading {
                state.latest = Some(reading.clone());
            }
            if state.connection == ConnectionState::Testing {
                self.transition(&mut state, ConnectionState::Connected, None, &mut effects);
                let token = CancellationToken::new();
                let mut description = String::new();
                if let Some(session) = state.session.as_mut() {
                    session.polling = Some(token.clone());
                    description = session.description.clone();
                }
                effects.notifications.push(Notification::new(
                    NotificationKind::Connected,
                    format!("Connected to {description}"),
                ));
                start = Some(token);
            }
        }

        self.run(effects);

        if let Some(reading) = &reading {
            if let Some(cache) = &self.inner.cache
                && let Err(e) = cache.set_cached_sensor_data(reading)
            {
                warn!("Failed to cache reading: {}", e);
            }
            self.inner.events.publish_reading(reading);
        }
        if let Some(token) = start {
            match events {
                Some(events) => self.spawn_forwarding(generation, token, events),
                None => self.spawn_polling(generation, token),
            }
        }
        match reading {
            Some(reading) => PollOutcome::Success(reading),
            None => PollOutcome::Linked,
        }
    }

    /// Record a failed check (or a dropped push link) for session `generation`.
    fn reject(&self, generation: u64, error: Error) -> PollOutcome {
        let mut effects = Effects::default();
        {
            let mut state = lock(&self.inner.state);
            if !Self::is_current(&state, generation) {
                debug!(generation, "Discarding result from previous session");
                return PollOutcome::Discarded;
            }

            let from = state.connection;
            if let Some(session) = state.session.as_mut() {
                session.stop_polling();
            }
            let cancelled = error.is_user_cancelled();
            let reason = (!cancelled).then(|| error.to_string());
            self.transition(&mut state, ConnectionState::Failed, reason, &mut effects);
            if from == ConnectionState::Connected && !cancelled {
                effects.notifications.push(Notification::new(
                    NotificationKind::ConnectionLost,
                    error.user_message(),
                ));
            }
        }

        self.run(effects);

        if error.is_user_cancelled() {
            debug!("Device selection cancelled");
        } else {
            warn!("Sensor read failed: {}", error);
        }
        PollOutcome::Failure(error)
    }

    fn is_current(state: &State, generation: u64) -> bool {
        state.session.as_ref().map(|s| s.generation) == Some(generation)
    }
}
