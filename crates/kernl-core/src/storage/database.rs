//! SQLite connection and schema

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

use super::StoreError;

/// Shared handle used from `spawn_blocking` closures
pub type SharedDatabase = Arc<parking_lot::Mutex<Database>>;

const SCHEMA_VERSION: i64 = 1;

const MIGRATIONS: &[&str] = &[
    // v1: threads and their append-only event log
    "CREATE TABLE IF NOT EXISTS threads (
        tid TEXT PRIMARY KEY,
        namespace TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        model_provider TEXT NOT NULL,
        model_id TEXT NOT NULL,
        context TEXT NOT NULL,
        state TEXT NOT NULL,
        tick INTEGER NOT NULL DEFAULT 0,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        lease_owner TEXT,
        lease_expires_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_threads_namespace ON threads(namespace, created_at);
    CREATE INDEX IF NOT EXISTS idx_threads_agent ON threads(agent_id, created_at);

    CREATE TABLE IF NOT EXISTS thread_events (
        tid TEXT NOT NULL REFERENCES threads(tid) ON DELETE CASCADE,
        id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        kind TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        data TEXT NOT NULL,
        PRIMARY KEY (tid, id),
        UNIQUE (tid, seq)
    );",
];

/// Owns the SQLite connection. Not `Sync`; share it as `SharedDatabase`.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("failed to create {:?}: {}", parent, e))
            })?;
        }

        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(path = ?path, journal_mode = %mode, "Opened kernl database");

        Self::init(conn)
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        let current: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if current >= SCHEMA_VERSION {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        for (i, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            tracing::info!(version = i + 1, "Applying kernl schema migration");
            tx.execute_batch(migration)?;
        }
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(parking_lot::Mutex::new(self))
    }
}
