//! Command-line interface for ESP32 tank water-quality sensors.
//!
//! The `aquamon` binary configures the sensor connection, shows live and
//! one-shot readings, records manual readings while offline and uploads them
//! once the readings API is reachable.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `config show\|path\|set` | Inspect and change CLI settings |
//! | `config http\|ble\|use\|clear` | Configure the sensor connection |
//! | `read` | Read the sensor once (falls back to the last known reading) |
//! | `watch` | Continuously monitor the sensor |
//! | `reading add\|list\|clear-synced` | Manual readings and the upload queue |
//! | `sync` | Upload pending readings |
//! | `tank add\|list\|remove` | Manage tanks |
//! | `auth login\|logout\|status` | Offline sign-in cache |
//! | `scan` | Find nearby BLE sensors |
//! | `completions` | Generate shell completions |
//!
//! # Configuration
//!
//! Settings live in `~/.config/aquamon/config.toml` (or platform equivalent):
//!
//! ```toml
//! database = "/var/lib/aquamon/aquamon.db"
//! api_url = "http://192.168.0.10:8080"
//! relay_url = "https://relay.example.com"
//! poll_interval_ms = 2000
//! unauthenticated_dev_mode = false
//! sync_status_display_ms = 3000
//! ```
//!
//! Device configuration is not kept here; it is stored in the database so
//! every client sharing it sees the same sensor.
//!
//! # Environment Variables
//!
//! - `AQUAMON_CONFIG`: configuration file path
//! - `AQUAMON_DATABASE`, `AQUAMON_API_URL`, `AQUAMON_RELAY_URL`: override the file
//! - `NO_COLOR`: disable colored output
//!
//! # Examples
//!
//! ```bash
//! aquamon config http 192.168.4.1
//! aquamon read
//! aquamon watch --interval 5000
//! aquamon reading add 35.2 --temperature 27.1 --tank "Pond A"
//! aquamon sync
//! ```

// Re-export core dependencies for convenience
pub use aquamon_core;
pub use aquamon_types;
