//! # SQLite Key-Value Store
//!
//! Durable [`KeyValueStore`] backed by a single SQLite table. Used by the FFI
//! layer so the engine can keep its pattern and settings blobs across
//! launches without going through the JS storage bridge.

use std::sync::Mutex;

use log::info;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use crate::error::{ProximityError, Result};
use crate::store::KeyValueStore;

/// SQLite-backed key-value store.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: &str) -> SqlResult<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[SqliteStore] Opened {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqlResult<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> SqlResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )
    }

    fn with_db<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> SqlResult<R>,
    {
        let db = self.db.lock().map_err(ProximityError::storage)?;
        f(&db).map_err(ProximityError::storage)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_db(|db| {
            db.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_db(|db| {
            db.execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_db(|db| {
            db.execute("DELETE FROM kv_store WHERE key = ?1", params![key])
                .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{load_json, save_json, WORKOUT_PATTERNS_KEY};
    use crate::WorkoutPatterns;

    #[test]
    fn test_in_memory_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v2".to_string()));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        // Removing a missing key is fine
        store.remove("k").unwrap();
    }

    #[test]
    fn test_persistence_across_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("proximity.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::new(path).unwrap();
            let mut patterns = WorkoutPatterns::default();
            patterns.record(1, 18);
            save_json(&store, WORKOUT_PATTERNS_KEY, &patterns).unwrap();
        }

        let store = SqliteStore::new(path).unwrap();
        let patterns: WorkoutPatterns = load_json(&store, WORKOUT_PATTERNS_KEY);
        assert_eq!(patterns.total_visits, 1);
        assert_eq!(patterns.weekly_visits.get(&1), Some(&1));
    }
}
