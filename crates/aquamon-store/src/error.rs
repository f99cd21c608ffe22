//! Error types for aquamon-store.

use std::path::PathBuf;

use aquamon_types::ParseError;

/// Result type for aquamon-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in aquamon-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored blob could not be encoded or decoded.
    #[error("Serialization error for '{key}': {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },

    /// A stored blob was written by a newer version of the application.
    #[error("'{key}' has version {found}, newest supported is {supported}")]
    UnsupportedVersion { key: String, found: u32, supported: u32 },

    /// A legacy blob has a shape no migration understands.
    #[error("Cannot migrate '{key}': {reason}")]
    Migration { key: String, reason: String },

    /// Tank not found.
    #[error("Tank not found: {0}")]
    TankNotFound(String),

    /// User input rejected by validation.
    #[error(transparent)]
    Invalid(#[from] ParseError),
}

impl Error {
    pub(crate) fn serialization(key: &str, source: serde_json::Error) -> Self {
        Self::Serialization {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn migration(key: &str, reason: impl Into<String>) -> Self {
        Self::Migration {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
