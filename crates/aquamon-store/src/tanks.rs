//! Tank registry stored under the `tanks` key.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use aquamon_types::{Tank, TankDraft};

use crate::error::{Error, Result};
use crate::keys;
use crate::store::Store;

/// Persisted shape of the tanks blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TanksState {
    /// Registered tanks in insertion order.
    #[serde(default)]
    pub tanks: Vec<Tank>,
}

/// CRUD access to registered tanks.
pub struct TankRepository<'a> {
    store: &'a Store,
}

impl<'a> TankRepository<'a> {
    /// Repository backed by `store`.
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// All tanks in insertion order.
    pub fn list(&self) -> Result<Vec<Tank>> {
        Ok(self.store.load_or_default::<TanksState>(keys::TANKS)?.tanks)
    }

    /// A tank by id.
    pub fn get(&self, id: &str) -> Result<Option<Tank>> {
        Ok(self.list()?.into_iter().find(|t| t.id == id))
    }

    /// A tank by display name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Result<Option<Tank>> {
        let name = name.trim();
        Ok(self
            .list()?
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    /// Register a new tank with a generated id and creation timestamp.
    pub fn add(&self, draft: TankDraft) -> Result<Tank> {
        draft.validate()?;
        let tank = Tank {
            id: uuid::Uuid::new_v4().to_string(),
            name: draft.name.trim().to_string(),
            construction: draft.construction,
            species: draft.species,
            fish_count: draft.fish_count,
            average_weight_g: draft.average_weight_g,
            area_m2: draft.area_m2,
            created_at: OffsetDateTime::now_utc(),
        };

        let added = tank.clone();
        self.store
            .update(keys::TANKS, |state: &mut TanksState| state.tanks.push(added))?;
        info!(id = %tank.id, name = %tank.name, "Registered tank");
        Ok(tank)
    }

    /// Replace a tank's editable fields, keeping its id and creation time.
    pub fn update(&self, id: &str, draft: TankDraft) -> Result<Tank> {
        draft.validate()?;
        let updated = self.store.update(keys::TANKS, |state: &mut TanksState| {
            let tank = state.tanks.iter_mut().find(|t| t.id == id)?;
            tank.name = draft.name.trim().to_string();
            tank.construction = draft.construction;
            tank.species = draft.species;
            tank.fish_count = draft.fish_count;
            tank.average_weight_g = draft.average_weight_g;
            tank.area_m2 = draft.area_m2;
            Some(tank.clone())
        })?;
        updated.ok_or_else(|| Error::TankNotFound(id.to_string()))
    }

    /// Delete a tank. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.store.update(keys::TANKS, |state: &mut TanksState| {
            let before = state.tanks.len();
            state.tanks.retain(|t| t.id != id);
            state.tanks.len() != before
        })?;
        if removed {
            info!(id, "Removed tank");
        }
        Ok(removed)
    }
}
