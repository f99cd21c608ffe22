//! Offline data cache.
//!
//! Holds the last-known sensor snapshot and the queue of readings the user
//! logged, persisted under the `offline-data-storage` key. Saving a reading
//! never touches the network; the [`crate::sync::SyncReconciler`] drains the
//! queue later.
//!
//! An unsynced entry only leaves the queue by being marked synced and then
//! pruned with [`OfflineDataCache::clear_synced_readings`].

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aquamon_store::{Store, keys};
use aquamon_types::{SavedReading, SensorReading};

use crate::error::Result;
use crate::util::lock;

/// A store shared between the caches, settings and tank registry.
pub type SharedStore = Arc<Mutex<Store>>;

/// Persisted shape of the offline data blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfflineData {
    /// Last reading received from the device.
    pub cached_sensor_data: Option<SensorReading>,
    /// When the queue was last fully drained (epoch ms).
    pub last_sync_time: Option<i64>,
    /// Readings logged by the user, oldest first.
    pub saved_readings: Vec<SavedReading>,
}

/// Handle to the offline data blob.
#[derive(Debug, Clone)]
pub struct OfflineDataCache {
    store: SharedStore,
}

impl OfflineDataCache {
    /// Create a cache over `store`.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn update<R>(&self, f: impl FnOnce(&mut OfflineData) -> R) -> Result<R> {
        Ok(lock(&self.store).update(keys::OFFLINE_DATA, f)?)
    }

    /// The whole blob.
    pub fn snapshot(&self) -> Result<OfflineData> {
        Ok(lock(&self.store).load_or_default(keys::OFFLINE_DATA)?)
    }

    /// Replace the last-known reading.
    pub fn set_cached_sensor_data(&self, reading: &SensorReading) -> Result<()> {
        self.update(|data| data.cached_sensor_data = Some(reading.clone()))
    }

    /// The last-known reading.
    pub fn cached_sensor_data(&self) -> Result<Option<SensorReading>> {
        Ok(self.snapshot()?.cached_sensor_data)
    }

    /// Queue a reading for upload and return its id.
    pub fn save_reading(&self, reading: SensorReading) -> Result<String> {
        self.save_entry(reading, None, None)
    }

    /// Queue a reading with optional tank name and notes.
    pub fn save_entry(
        &self,
        reading: SensorReading,
        tank: Option<String>,
        notes: Option<String>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut entry = SavedReading::new(id.clone(), reading);
        entry.tank = tank;
        entry.notes = notes;

        let pending = self.update(|data| {
            data.saved_readings.push(entry);
            data.saved_readings.iter().filter(|r| !r.synced).count()
        })?;
        info!(id = %id, pending, "Saved reading for sync");
        Ok(id)
    }

    /// Every saved reading, synced or not.
    pub fn saved_readings(&self) -> Result<Vec<SavedReading>> {
        Ok(self.snapshot()?.saved_readings)
    }

    /// Saved readings still waiting for upload, oldest first.
    pub fn get_unsynced_readings(&self) -> Result<Vec<SavedReading>> {
        Ok(self
            .saved_readings()?
            .into_iter()
            .filter(|r| !r.synced)
            .collect())
    }

    /// Number of readings waiting for upload.
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.get_unsynced_readings()?.len())
    }

    /// Flag a reading as uploaded. Returns whether the id was found.
    pub fn mark_reading_as_synced(&self, id: &str) -> Result<bool> {
        let found = self.update(|data| {
            match data.saved_readings.iter_mut().find(|r| r.id == id) {
                Some(entry) => {
                    entry.synced = true;
                    true
                }
                None => false,
            }
        })?;
        debug!(id, found, "Marked reading as synced");
        Ok(found)
    }

    /// Drop every synced reading. Returns how many were removed.
    pub fn clear_synced_readings(&self) -> Result<usize> {
        let removed = self.update(|data| {
            let before = data.saved_readings.len();
            data.saved_readings.retain(|r| !r.synced);
            before - data.saved_readings.len()
        })?;
        if removed > 0 {
            info!(removed, "Pruned synced readings");
        }
        Ok(removed)
    }

    /// Record a completed sync.
    pub fn set_last_sync_time(&self, at_millis: i64) -> Result<()> {
        self.update(|data| data.last_sync_time = Some(at_millis))
    }

    /// When the queue was last fully drained.
    pub fn last_sync_time(&self) -> Result<Option<i64>> {
        Ok(self.snapshot()?.last_sync_time)
    }
}

#[cfg(test)]
pub(crate) fn memory_store() -> SharedStore {
    Arc::new(Mutex::new(Store::open_in_memory().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> OfflineDataCache {
        OfflineDataCache::new(memory_store())
    }

    #[test]
    fn test_cached_sensor_data_last_write_wins() {
        let cache = cache();
        assert!(cache.cached_sensor_data().unwrap().is_none());

        cache
            .set_cached_sensor_data(&SensorReading::new(10.0, 1))
            .unwrap();
        cache
            .set_cached_sensor_data(&SensorReading::new(20.0, 2))
            .unwrap();

        let cached = cache.cached_sensor_data().unwrap().unwrap();
        assert_eq!(cached.turbidity, 20.0);
        assert_eq!(cached.timestamp, 2);
    }

    #[test]
    fn test_save_then_mark_synced() {
        let cache = cache();
        let reading = SensorReading::new(45.0, 1_700_000_000_000).with_ph(7.2);
        let id = cache.save_reading(reading.clone()).unwrap();

        let unsynced = cache.get_unsynced_readings().unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, id);
        assert_eq!(unsynced[0].reading, reading);
        assert!(!unsynced[0].synced);

        assert!(cache.mark_reading_as_synced(&id).unwrap());
        assert!(cache.get_unsynced_readings().unwrap().is_empty());
        assert_eq!(cache.saved_readings().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_unknown_id() {
        let cache = cache();
        assert!(!cache.mark_reading_as_synced("nope").unwrap());
    }

    #[test]
    fn test_clear_synced_keeps_pending() {
        let cache = cache();
        let a = cache.save_reading(SensorReading::new(1.0, 1)).unwrap();
        let b = cache.save_reading(SensorReading::new(2.0, 2)).unwrap();
        cache.mark_reading_as_synced(&a).unwrap();

        assert_eq!(cache.clear_synced_readings().unwrap(), 1);
        let remaining = cache.saved_readings().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);
        assert_eq!(cache.clear_synced_readings().unwrap(), 0);
    }

    #[test]
    fn test_save_entry_keeps_tank_and_notes() {
        let cache = cache();
        cache
            .save_entry(
                SensorReading::new(30.0, 1),
                Some("Tanque 1".into()),
                Some("after feeding".into()),
            )
            .unwrap();
        let entry = &cache.get_unsynced_readings().unwrap()[0];
        assert_eq!(entry.tank.as_deref(), Some("Tanque 1"));
        assert_eq!(entry.notes.as_deref(), Some("after feeding"));
    }

    #[test]
    fn test_ids_are_unique() {
        let cache = cache();
        let a = cache.save_reading(SensorReading::new(1.0, 1)).unwrap();
        let b = cache.save_reading(SensorReading::new(1.0, 1)).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.pending_count().unwrap(), 2);
    }

    #[test]
    fn test_last_sync_time() {
        let cache = cache();
        assert_eq!(cache.last_sync_time().unwrap(), None);
        cache.set_last_sync_time(42).unwrap();
        assert_eq!(cache.last_sync_time().unwrap(), Some(42));
    }

    #[test]
    fn test_blob_uses_camel_case_keys() {
        let store = memory_store();
        let cache = OfflineDataCache::new(Arc::clone(&store));
        cache.save_reading(SensorReading::new(5.0, 1)).unwrap();

        let raw = lock(&store).get_raw(keys::OFFLINE_DATA).unwrap().unwrap();
        assert!(raw.contains("savedReadings"));
        assert!(raw.contains("\"synced\":false"));
    }
}
