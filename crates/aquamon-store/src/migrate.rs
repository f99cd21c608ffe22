//! Versioned blob envelopes and their migrations.
//!
//! Every blob is stored as `{"version": n, "state": ...}`. When the
//! application's idea of a blob's shape changes, its version is bumped and a
//! step is added here. Steps run once, at load, and the upgraded envelope is
//! written back, so readers never see legacy shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::error::{Error, Result};
use crate::keys;

/// A stored blob together with the version of its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Shape version of `state`.
    #[serde(default)]
    pub version: u32,
    /// The blob itself.
    pub state: Value,
}

impl Envelope {
    /// Wrap a value at the current version for `key`.
    pub fn current(key: &str, state: Value) -> Self {
        Self {
            version: current_version(key),
            state,
        }
    }

    /// Decode a raw stored string.
    ///
    /// Values written before envelopes existed (a bare JSON state) are
    /// treated as version 0.
    pub fn decode(key: &str, raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| Error::serialization(key, e))?;
        match value {
            Value::Object(ref map) if map.contains_key("state") => {
                serde_json::from_value(value).map_err(|e| Error::serialization(key, e))
            }
            state => Ok(Self { version: 0, state }),
        }
    }
}

/// Current shape version of the blob stored under `key`.
pub fn current_version(key: &str) -> u32 {
    match key {
        keys::TANKS => 1,
        _ => 0,
    }
}

/// Bring an envelope up to the current version for `key`.
///
/// Returns whether any step ran (and the caller should write back).
pub fn upgrade(key: &str, envelope: &mut Envelope) -> Result<bool> {
    let target = current_version(key);
    if envelope.version > target {
        return Err(Error::UnsupportedVersion {
            key: key.to_string(),
            found: envelope.version,
            supported: target,
        });
    }

    let from = envelope.version;
    while envelope.version < target {
        match (key, envelope.version) {
            (keys::TANKS, 0) => tanks_v0_to_v1(&mut envelope.state)?,
            (_, v) => return Err(Error::migration(key, format!("no step from version {v}"))),
        }
        envelope.version += 1;
    }

    if from != target {
        info!(key, from, to = target, "Migrated stored blob");
    }
    Ok(from != target)
}

/// Tanks v0 lacked construction, species, stocking and creation fields.
fn tanks_v0_to_v1(state: &mut Value) -> Result<()> {
    let created_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| Error::migration(keys::TANKS, e.to_string()))?;

    if state.is_null() {
        *state = serde_json::json!({ "tanks": [] });
        return Ok(());
    }
    let Value::Object(map) = state else {
        return Err(Error::migration(keys::TANKS, "state is not an object"));
    };
    let tanks = map
        .entry("tanks")
        .or_insert_with(|| Value::Array(Vec::new()));

    let Value::Array(list) = tanks else {
        return Err(Error::migration(keys::TANKS, "'tanks' is not an array"));
    };

    for tank in list.iter_mut() {
        let Value::Object(fields) = tank else {
            return Err(Error::migration(keys::TANKS, "tank entry is not an object"));
        };
        fill(fields, "id", || uuid::Uuid::new_v4().to_string().into());
        fill(fields, "name", || "".into());
        fill(fields, "construction", || "other".into());
        fill(fields, "species", || "".into());
        fill(fields, "fishCount", || 0.into());
        fill(fields, "averageWeightG", || 0.0.into());
        fill(fields, "areaM2", || 0.0.into());
        fill(fields, "createdAt", || created_at.clone().into());
    }
    Ok(())
}

fn fill(fields: &mut Map<String, Value>, name: &str, default: impl FnOnce() -> Value) {
    match fields.get(name) {
        Some(v) if !v.is_null() => {}
        _ => {
            fields.insert(name.to_string(), default());
        }
    }
}
