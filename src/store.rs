//! Key-value persistence boundary.
//!
//! The host app owns the actual storage (AsyncStorage, SQLite, ...). The
//! engine only needs `get`/`set`/`remove` of JSON strings under a few keys.

use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProximityError, Result};

/// Key holding the serialized [`crate::WorkoutPatterns`].
pub const WORKOUT_PATTERNS_KEY: &str = "@workout_patterns";
/// Key holding the serialized [`crate::ReminderSettings`].
pub const NOTIFICATION_SETTINGS_KEY: &str = "@notification_settings";
/// Key holding the serialized [`crate::LastVisit`].
pub const LAST_GYM_VISIT_KEY: &str = "@last_gym_visit";

/// Persistence collaborator.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Load a JSON blob, falling back to `T::default()` when the key is absent,
/// the store is unreachable, or the blob does not parse.
pub fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match store.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("[Store] Corrupt blob under {}, using defaults: {}", key, e);
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            warn!("[Store] Failed to read {}, using defaults: {}", key, e);
            T::default()
        }
    }
}

/// Serialize and store a JSON blob.
pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(ProximityError::storage)?;
    store.set(key, &raw)
}

/// In-memory store, used by tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(ProximityError::storage)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(ProximityError::storage)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(ProximityError::storage)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Blob {
        count: u32,
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(ProximityError::storage("unavailable"))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(ProximityError::storage("unavailable"))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(ProximityError::storage("unavailable"))
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_load_json_defaults() {
        let store = MemoryStore::new();
        let blob: Blob = load_json(&store, "missing");
        assert_eq!(blob, Blob::default());

        store.set("corrupt", "{not json").unwrap();
        let blob: Blob = load_json(&store, "corrupt");
        assert_eq!(blob, Blob::default());

        let blob: Blob = load_json(&BrokenStore, "anything");
        assert_eq!(blob, Blob::default());
    }

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        save_json(&store, "blob", &Blob { count: 7 }).unwrap();
        let blob: Blob = load_json(&store, "blob");
        assert_eq!(blob.count, 7);
    }

    #[test]
    fn test_save_reports_failure() {
        let result = save_json(&BrokenStore, "blob", &Blob { count: 1 });
        assert!(matches!(
            result,
            Err(ProximityError::StorageUnavailable { .. })
        ));
    }
}
