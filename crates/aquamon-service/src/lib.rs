//! Device relay, simulated sensor and readings API for aquamon.
//!
//! This crate provides the backend a tank-monitoring client talks to:
//! - Relays requests to ESP32 sensors on the local network for clients
//!   that cannot reach them directly
//! - Serves a simulated turbidity sensor for demos
//! - Accepts manual readings uploaded by the client's sync reconciler
//! - Streams accepted readings over WebSocket
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET|POST /api/esp32/proxy?url=<target>` - Relay to a private-network device
//! - `GET|POST /api/turbidez` - Simulated sensor (when `demo.enabled`)
//! - `POST /api/readings` - Upload a reading (idempotent on its id)
//! - `GET /api/readings` - Query uploaded readings
//! - `WS /api/ws` - Real-time stream of accepted readings
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/aquamon/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [relay]
//! timeout_secs = 10
//! allow_localhost = true
//!
//! [demo]
//! enabled = true
//! min_latency_ms = 100
//! max_latency_ms = 500
//!
//! [storage]
//! path = "~/.local/share/aquamon/server.db"
//! ```

pub mod api;
pub mod config;
pub mod demo;
pub mod relay;
pub mod state;
pub mod ws;

pub use api::{AppError, app};
pub use config::{
    Config, ConfigError, DemoConfig, RelayConfig, ServerConfig, StorageConfig, ValidationError,
    default_config_path,
};
pub use relay::{PROXY_PATH, is_private_host};
pub use state::{AppState, ReadingEvent};
