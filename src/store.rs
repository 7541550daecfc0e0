//! Key-value stores backing the sync ledger.
//!
//! - [`MemoryStore`]: process-local, for tests and one-shot runs.
//! - [`SqliteStore`] (feature `persistence`): a single `kv` table in SQLite.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::providers::KeyValueStore;

#[cfg(feature = "persistence")]
use rusqlite::{params, Connection, OptionalExtension};

fn poisoned<T>(_: T) -> SyncError {
    SyncError::persistence("store lock poisoned")
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// SQLite-backed store. One row per key.
#[cfg(feature = "persistence")]
pub struct SqliteStore {
    db: Mutex<Connection>,
    db_path: String,
}

#[cfg(feature = "persistence")]
impl SqliteStore {
    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path).map_err(sql_error)?;
        Self::init_schema(&db)?;
        log::info!("[Store] Opened key-value store at {}", db_path);

        Ok(Self {
            db: Mutex::new(db),
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )
        .map_err(sql_error)
    }
}

#[cfg(feature = "persistence")]
fn sql_error(e: rusqlite::Error) -> SyncError {
    SyncError::persistence(e.to_string())
}

#[cfg(feature = "persistence")]
impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.lock().map_err(poisoned)?;
        db.query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
            row.get::<_, Vec<u8>>(0)
        })
        .optional()
        .map_err(sql_error)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let db = self.db.lock().map_err(poisoned)?;
        db.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, strftime('%s', 'now'))",
            params![key, value],
        )
        .map_err(sql_error)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.lock().map_err(poisoned)?;
        db.execute("DELETE FROM kv WHERE key = ?", params![key])
            .map_err(sql_error)?;
        Ok(())
    }
}
