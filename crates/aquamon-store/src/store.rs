//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::migrate::{self, Envelope};

/// Table layout version, kept in SQLite's `user_version`. Blob shapes are
/// versioned separately by [`crate::migrate`].
const LAYOUT_VERSION: i32 = 1;

/// SQLite-backed key-value store for the application's JSON blobs.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        prepare(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        prepare(&conn)?;
        Ok(Self { conn })
    }

    // === Typed access ===

    /// Load the blob under `key`, migrating it to the current shape.
    ///
    /// A migrated blob is written back before being returned.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };

        let mut envelope = Envelope::decode(key, &raw)?;
        if migrate::upgrade(key, &mut envelope)? {
            self.put_envelope(key, &envelope)?;
        }

        let value =
            serde_json::from_value(envelope.state).map_err(|e| Error::serialization(key, e))?;
        Ok(Some(value))
    }

    /// Load the blob under `key`, or the type's default when absent.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.load(key)?.unwrap_or_default())
    }

    /// Store `value` under `key` at the current shape version.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let state = serde_json::to_value(value).map_err(|e| Error::serialization(key, e))?;
        self.put_envelope(key, &Envelope::current(key, state))
    }

    /// Load, modify and save a blob in one transaction.
    pub fn update<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let tx = self.conn.unchecked_transaction()?;
        let mut value: T = self.load_or_default(key)?;
        let result = f(&mut value);
        self.save(key, &value)?;
        tx.commit()?;
        Ok(result)
    }

    // === Raw access ===

    /// The stored string under `key`, if any.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Overwrite the stored string under `key`.
    ///
    /// The string is stored as-is; it is migrated on the next [`Store::load`].
    pub fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, value, OffsetDateTime::now_utc().unix_timestamp()],
        )?;
        debug!(key, bytes = value.len(), "Stored blob");
        Ok(())
    }

    /// Delete the blob under `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        if removed > 0 {
            debug!(key, "Removed blob");
        }
        Ok(removed > 0)
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// When `key` was last written.
    pub fn updated_at(&self, key: &str) -> Result<Option<OffsetDateTime>> {
        let secs: Option<i64> = self
            .conn
            .query_row("SELECT updated_at FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(secs.and_then(|s| match OffsetDateTime::from_unix_timestamp(s) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(key, "Invalid stored timestamp {}: {}", s, e);
                None
            }
        }))
    }

    fn put_envelope(&self, key: &str, envelope: &Envelope) -> Result<()> {
        let raw = serde_json::to_string(envelope).map_err(|e| Error::serialization(key, e))?;
        self.set_raw(key, &raw)
    }
}

/// Create the `kv` table on a fresh database and stamp the layout version.
fn prepare(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == LAYOUT_VERSION {
        return Ok(());
    }
    if version > LAYOUT_VERSION {
        warn!("Database layout v{} is newer than v{}", version, LAYOUT_VERSION);
        return Ok(());
    }

    debug!("Preparing database layout v{} (found v{})", LAYOUT_VERSION, version);
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS kv (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL,
             updated_at INTEGER NOT NULL
         );
         PRAGMA user_version = {LAYOUT_VERSION};"
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        hits: u32,
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_prepare_stamps_layout_once() {
        let conn = Connection::open_in_memory().unwrap();
        prepare(&conn).unwrap();
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, LAYOUT_VERSION);

        conn.execute("INSERT INTO kv VALUES ('k', 'v', 0)", []).unwrap();
        prepare(&conn).unwrap();
        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_save_and_load() {
        let store = Store::open_in_memory().unwrap();
        store.save("counter", &Counter { hits: 3 }).unwrap();

        let loaded: Counter = store.load("counter").unwrap().unwrap();
        assert_eq!(loaded, Counter { hits: 3 });
        assert!(store.updated_at("counter").unwrap().is_some());
    }

    #[test]
    fn test_load_missing_is_none() {
        let store = Store::open_in_memory().unwrap();
        let loaded: Option<Counter> = store.load("missing").unwrap();
        assert!(loaded.is_none());
        assert_eq!(store.load_or_default::<Counter>("missing").unwrap().hits, 0);
    }

    #[test]
    fn test_saved_blob_is_enveloped() {
        let store = Store::open_in_memory().unwrap();
        store.save("counter", &Counter { hits: 1 }).unwrap();

        let raw = store.get_raw("counter").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 0);
        assert_eq!(value["state"]["hits"], 1);
    }

    #[test]
    fn test_update_in_place() {
        let store = Store::open_in_memory().unwrap();
        for _ in 0..3 {
            store.update("counter", |c: &mut Counter| c.hits += 1).unwrap();
        }
        let loaded: Counter = store.load("counter").unwrap().unwrap();
        assert_eq!(loaded.hits, 3);
    }

    #[test]
    fn test_remove() {
        let store = Store::open_in_memory().unwrap();
        store.save("counter", &Counter::default()).unwrap();
        assert!(store.remove("counter").unwrap());
        assert!(!store.remove("counter").unwrap());
        assert!(store.get_raw("counter").unwrap().is_none());
    }

    #[test]
    fn test_legacy_blob_migrated_and_written_back() {
        let store = Store::open_in_memory().unwrap();
        store
            .set_raw(keys::TANKS, r#"{"tanks":[{"id":"t1","name":"Viveiro"}]}"#)
            .unwrap();

        let state: serde_json::Value = store.load(keys::TANKS).unwrap().unwrap();
        assert_eq!(state["tanks"][0]["construction"], "other");

        let raw = store.get_raw(keys::TANKS).unwrap().unwrap();
        let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored["version"], 1);
    }

    #[test]
    fn test_corrupt_blob_is_error() {
        let store = Store::open_in_memory().unwrap();
        store.set_raw("counter", "{not json").unwrap();
        let err = store.load::<Counter>("counter").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        {
            let store = Store::open(&path).unwrap();
            store.save("counter", &Counter { hits: 7 }).unwrap();
        }
        let store = Store::open(&path).unwrap();
        let loaded: Counter = store.load("counter").unwrap().unwrap();
        assert_eq!(loaded.hits, 7);
    }
}
