//! Local persistence for the aquamon connectivity core.
//!
//! This crate provides a SQLite-backed key-value store holding the same JSON
//! blobs the web client keeps in local storage: device settings, the offline
//! data cache, the offline auth cache and the tank registry.
//!
//! # Features
//!
//! - Typed `load`/`save` of JSON blobs under well-known [`keys`]
//! - Versioned envelopes with one-time migration at load
//! - Tank CRUD through [`TankRepository`]
//!
//! # Example
//!
//! ```no_run
//! use aquamon_store::{Store, TankRepository};
//!
//! let store = Store::open_default()?;
//! for tank in TankRepository::new(&store).list()? {
//!     println!("{} ({} fish)", tank.name, tank.fish_count);
//! }
//! # Ok::<(), aquamon_store::Error>(())
//! ```

mod error;
pub mod keys;
pub mod migrate;
mod store;
mod tanks;

pub use error::{Error, Result};
pub use migrate::Envelope;
pub use store::Store;
pub use tanks::{TankRepository, TanksState};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/aquamon/data.db`
/// - macOS: `~/Library/Application Support/aquamon/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\aquamon\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("aquamon")
        .join("data.db")
}
