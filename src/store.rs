use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::SyncError;

/// Latest schema this crate knows how to create.
pub const SCHEMA_VERSION: i32 = 1;

/// SQLite database holding both the mirror entries and the pending operation queue.
///
/// The connection sits behind a mutex so one store can be shared (via `Arc`)
/// by every repository in the process. No lock is held across an `.await`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Bind the store to an existing connection.
    pub fn with_connection(conn: Connection) -> Result<Self, SyncError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create tables and indexes. Safe to call multiple times.
    pub fn init_schema(&self) -> Result<(), SyncError> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS mirror_entries (
id TEXT PRIMARY KEY,
body TEXT NOT NULL, -- JSON object
mirrored_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_ops (
seq INTEGER PRIMARY KEY AUTOINCREMENT,
op_id TEXT NOT NULL UNIQUE,
op_type TEXT NOT NULL CHECK(op_type IN ('CREATE','UPDATE','DELETE')),
target_id TEXT NOT NULL,
payload TEXT NOT NULL, -- JSON
timestamp_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_ops_order
ON pending_ops(timestamp_ms, seq);

CREATE TABLE IF NOT EXISTS sync_kv (
k TEXT PRIMARY KEY,
v TEXT NOT NULL
);
"#,
        )?;
        conn.execute(
            "INSERT INTO sync_kv(k,v) VALUES('schema_version',?1)
ON CONFLICT(k) DO NOTHING",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    /// Return the current integer schema version stored in `sync_kv`.
    pub fn schema_version(&self) -> Result<i32, SyncError> {
        let ver: Option<String> = self
            .conn()
            .query_row("SELECT v FROM sync_kv WHERE k='schema_version'", [], |r| r.get(0))
            .optional()?;
        Ok(ver.and_then(|s| s.parse::<i32>().ok()).unwrap_or(SCHEMA_VERSION))
    }

    /// Advance the stored schema version to `target_version` inside one transaction.
    pub fn run_migrations(&self, target_version: i32) -> Result<(), SyncError> {
        if target_version < 1 {
            return Err(SyncError::State("invalid target_version"));
        }
        if self.schema_version()? >= target_version {
            return Ok(());
        }
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO sync_kv(k,v) VALUES('schema_version',?1)
ON CONFLICT(k) DO UPDATE SET v=excluded.v",
                params![target_version.to_string()],
            )?;
            Ok(())
        })
    }

    /// Execute `f` inside a transaction and commit if it returns Ok.
    pub fn with_tx<R, F>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<R, SyncError>,
    {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}
