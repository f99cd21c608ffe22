//! Application state shared across handlers.
//!
//! # Broadcast Channel Behavior
//!
//! `readings_tx` fans every newly accepted reading out to WebSocket
//! clients. Its capacity is `server.broadcast_buffer`; a subscriber that
//! falls further behind than that loses the oldest events. Senders never
//! block.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};

use aquamon_store::Store;
use aquamon_types::SavedReading;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The data store (wrapped in Mutex for thread-safe access).
    pub store: Mutex<Store>,
    /// Configuration, fixed for the life of the server.
    pub config: Config,
    /// Client used for relayed upstream requests; `None` if it could not
    /// be built, in which case the relay refuses every request.
    pub client: Option<reqwest::Client>,
    /// Broadcast channel for newly accepted readings.
    pub readings_tx: broadcast::Sender<ReadingEvent>,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let (readings_tx, _) = broadcast::channel(config.server.broadcast_buffer.max(1));
        Arc::new(Self {
            store: Mutex::new(store),
            config,
            client: relay_client(),
            readings_tx,
        })
    }
}

/// Client for relayed requests.
///
/// Redirects are handed back to the caller rather than followed, and proxy
/// environment variables are ignored: the private-host check only sees the
/// requested URL, so no other hop may be taken on the caller's behalf.
pub fn relay_client() -> Option<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .map_err(|e| tracing::error!("Relay disabled, HTTP client unavailable: {}", e))
        .ok()
}

/// A reading event for WebSocket broadcast.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReadingEvent {
    /// The reading as uploaded.
    pub reading: SavedReading,
    /// When the service accepted it.
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: time::OffsetDateTime,
}
