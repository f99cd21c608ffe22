//! Offline auth cache.
//!
//! Keeps a snapshot of the signed-in user so the application stays usable
//! without network access. The snapshot is trusted for
//! [`OFFLINE_SESSION_WINDOW`] after the last sign-in; past that it is wiped
//! and the user must sign in again once online.
//!
//! Access policy, in order:
//!
//! 1. Unauthenticated dev mode allows everything.
//! 2. A user who never signed in on this machine must sign in.
//! 3. Online access follows the live provider session.
//! 4. Offline access is allowed while the cached session is valid.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use aquamon_store::keys;
use aquamon_types::AuthUser;

use crate::error::{Error, Result};
use crate::offline::SharedStore;
use crate::util::{Clock, SystemClock, lock};

/// How long a cached session stays valid without a fresh sign-in.
pub const OFFLINE_SESSION_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Persisted shape of the offline auth blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfflineAuthState {
    /// The last signed-in user.
    pub cached_user: Option<AuthUser>,
    /// When that user signed in (epoch ms).
    pub last_login_time: Option<i64>,
    /// Set on first sign-in, never cleared.
    pub has_ever_logged_in: bool,
    /// Result of the most recent validation.
    pub offline_session_valid: bool,
}

/// Outcome of the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Proceed without signing in.
    Allow,
    /// Send the user to the sign-in entry point.
    RequireLogin,
    /// Ask the live authentication provider.
    DeferToProvider,
}

/// Handle to the offline auth blob.
pub struct OfflineAuthCache {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    dev_mode: bool,
    window: Duration,
}

impl std::fmt::Debug for OfflineAuthCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineAuthCache")
            .field("dev_mode", &self.dev_mode)
            .field("window", &self.window)
            .finish()
    }
}

impl OfflineAuthCache {
    /// Create a cache over `store` using the system clock.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            dev_mode: false,
            window: OFFLINE_SESSION_WINDOW,
        }
    }

    /// Use a different clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bypass authentication entirely.
    pub fn unauthenticated_dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Change the session window.
    pub fn session_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// The whole blob.
    pub fn state(&self) -> Result<OfflineAuthState> {
        Ok(lock(&self.store).load_or_default(keys::OFFLINE_AUTH)?)
    }

    fn update<R>(&self, f: impl FnOnce(&mut OfflineAuthState) -> R) -> Result<R> {
        Ok(lock(&self.store).update(keys::OFFLINE_AUTH, f)?)
    }

    /// Store the signed-in user, or clear it on sign-out.
    pub fn set_cached_user(&self, user: Option<AuthUser>) -> Result<()> {
        let now = self.clock.now_millis();
        self.update(|state| match user {
            Some(user) => {
                info!(user = %user.email, "Cached user for offline access");
                state.cached_user = Some(user);
                state.last_login_time = Some(now);
                state.has_ever_logged_in = true;
                state.offline_session_valid = true;
            }
            None => {
                debug!("Cleared cached user");
                state.cached_user = None;
                state.last_login_time = None;
                state.offline_session_valid = false;
            }
        })
    }

    /// The cached user, without validating the session.
    pub fn cached_user(&self) -> Result<Option<AuthUser>> {
        Ok(self.state()?.cached_user)
    }

    /// Whether anyone ever signed in on this machine.
    pub fn has_ever_logged_in(&self) -> Result<bool> {
        Ok(self.state()?.has_ever_logged_in)
    }

    /// Recompute session validity. An expired session is wiped.
    pub fn validate_offline_session(&self) -> Result<bool> {
        let now = self.clock.now_millis();
        let window = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        self.update(|state| {
            let valid = match (&state.cached_user, state.last_login_time) {
                (Some(_), Some(last)) => now.saturating_sub(last) < window,
                _ => false,
            };
            if !valid && state.cached_user.is_some() {
                warn!("Offline session expired; clearing cached user");
            }
            if !valid {
                state.cached_user = None;
                state.last_login_time = None;
            }
            state.offline_session_valid = valid;
            valid
        })
    }

    /// Apply the access policy.
    pub fn access_decision(&self, online: bool) -> Result<AccessDecision> {
        if self.dev_mode {
            return Ok(AccessDecision::Allow);
        }
        if !self.has_ever_logged_in()? {
            return Ok(AccessDecision::RequireLogin);
        }
        if online {
            return Ok(AccessDecision::DeferToProvider);
        }
        Ok(if self.validate_offline_session()? {
            AccessDecision::Allow
        } else {
            AccessDecision::RequireLogin
        })
    }

    /// Whether the user must sign in.
    ///
    /// `provider_session` is the live provider's answer, used when online.
    pub fn is_auth_required(&self, online: bool, provider_session: bool) -> Result<bool> {
        Ok(match self.access_decision(online)? {
            AccessDecision::Allow => false,
            AccessDecision::RequireLogin => true,
            AccessDecision::DeferToProvider => !provider_session,
        })
    }

    /// Like [`Self::is_auth_required`], but as an error saying why.
    pub fn require_access(&self, online: bool, provider_session: bool) -> Result<()> {
        if !self.is_auth_required(online, provider_session)? {
            return Ok(());
        }
        if !online && self.has_ever_logged_in()? {
            Err(Error::SessionExpired)
        } else {
            Err(Error::Unauthorized)
        }
    }
}
