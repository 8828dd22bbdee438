use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use simple_kv_store::{normalize_key, KeyValueStore};

use crate::{error::StoreError, model::TimerRecord};

pub const STORAGE_VERSION: u32 = 1;

/// Timer id → record, as persisted.
pub type TimerSnapshot = BTreeMap<String, TimerRecord>;

/// Versioned wrapper around the persisted snapshot.
///
/// ```json
/// { "version": 1, "key": "switch_timer", "data": { "switch_timer.lamp": { ... } } }
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct StoredTimers {
    version: u32,
    #[serde(default)]
    key: String,
    #[serde(default)]
    data: Option<TimerSnapshot>,
}

/// Loads and saves the whole active-timer table as one document in a key-value store.
pub struct TimerStore {
    store: KeyValueStore,
    key: String,
}

impl TimerStore {
    pub fn new(store: KeyValueStore, key: &str) -> Self {
        Self {
            store,
            key: normalize_key(key),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the persisted snapshot. A missing, `null` or empty document yields an empty table.
    pub async fn load(&self) -> Result<TimerSnapshot, StoreError> {
        let Some(raw) = self.store.get::<serde_json::Value>(&self.key).await else {
            log::debug!("No stored timers found under [{}]", self.key);
            return Ok(TimerSnapshot::new());
        };
        if raw.is_null() || raw.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(TimerSnapshot::new());
        }

        let stored: StoredTimers = serde_json::from_value(raw).map_err(|source| StoreError::Corrupt {
            key: self.key.clone(),
            source,
        })?;
        if stored.version > STORAGE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                key: self.key.clone(),
                expected: STORAGE_VERSION,
                found: stored.version,
            });
        }
        let timers = stored.data.unwrap_or_default();
        log::debug!("Loaded {} stored timer(s) from [{}]", timers.len(), self.key);
        Ok(timers)
    }

    /// Replaces the persisted document with `timers`.
    pub async fn save(&self, timers: &TimerSnapshot) -> Result<(), StoreError> {
        let document = StoredTimers {
            version: STORAGE_VERSION,
            key: self.key.clone(),
            data: Some(timers.clone()),
        };
        let value = serde_json::to_value(&document).map_err(|e| StoreError::Save {
            key: self.key.clone(),
            reason: e.to_string(),
        })?;
        self.store.set(&self.key, &value).await.map_err(|e| StoreError::Save {
            key: self.key.clone(),
            reason: e.to_string(),
        })?;
        log::trace!("Saved {} timer(s) to [{}]", timers.len(), self.key);
        Ok(())
    }
}
