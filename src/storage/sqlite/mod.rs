//! SQLite implementation of every storage trait.
//!
//! One connection behind a `parking_lot::Mutex`. Several backends may open
//! the same file; cross-connection writers serialize through
//! `BEGIN IMMEDIATE` and wait up to the configured busy timeout.

mod audit;
mod ledger;
mod rows;
mod secrets;

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};

pub(crate) use rows::SqliteRows;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS secrets_rotation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    secret_name TEXT NOT NULL UNIQUE,
    active_version INTEGER,
    last_rotation TEXT,
    next_rotation TEXT
);

CREATE TABLE IF NOT EXISTS secret_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    secret_id INTEGER NOT NULL REFERENCES secrets_rotation(id),
    version INTEGER NOT NULL,
    value_protected TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 0,
    is_valid_for_verification INTEGER NOT NULL DEFAULT 1,
    UNIQUE (secret_id, version)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_secret_versions_one_active
    ON secret_versions(secret_id) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS rotation_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    secret_name TEXT NOT NULL,
    action TEXT NOT NULL,
    old_version INTEGER,
    new_version INTEGER,
    triggered_by TEXT NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rotation_audit_secret
    ON rotation_audit(secret_name, id);

CREATE TABLE IF NOT EXISTS audit_log_immutable (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id TEXT,
    action TEXT NOT NULL,
    entity TEXT NOT NULL,
    entity_id TEXT,
    payload TEXT NOT NULL,
    ts TEXT NOT NULL,
    prev_hash TEXT NOT NULL UNIQUE,
    curr_hash TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log_immutable(actor_id, id);
CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log_immutable(entity, entity_id, id);
CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_log_immutable(ts);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
    BEFORE UPDATE ON audit_log_immutable
    BEGIN SELECT RAISE(ABORT, 'audit_log_immutable is append-only'); END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
    BEFORE DELETE ON audit_log_immutable
    BEGIN SELECT RAISE(ABORT, 'audit_log_immutable is append-only'); END;

CREATE TABLE IF NOT EXISTS audit_digests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    entry_count INTEGER NOT NULL,
    first_entry_id INTEGER,
    last_entry_id INTEGER,
    head_hash TEXT NOT NULL,
    digest_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS key_rotations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE,
    old_key_fingerprint TEXT NOT NULL,
    new_key_fingerprint TEXT NOT NULL,
    rotation_type TEXT NOT NULL,
    status TEXT NOT NULL,
    scheduled_at TEXT,
    created_by TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    result TEXT,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_key_rotations_due
    ON key_rotations(status, scheduled_at);

CREATE TABLE IF NOT EXISTS key_rotation_progress (
    old_key_fingerprint TEXT NOT NULL,
    new_key_fingerprint TEXT NOT NULL,
    table_name TEXT NOT NULL,
    row_id INTEGER NOT NULL,
    rotated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (old_key_fingerprint, new_key_fingerprint, table_name, row_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_key_rotation_progress_row
    ON key_rotation_progress (table_name, row_id);
"#;

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    store_id: String,
}

impl SqliteBackend {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Self::from_connection(conn, config, format!("sqlite:{}", resolved.display()))
    }

    /// Private in-memory database; each call is a distinct store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(
            Connection::open_in_memory()?,
            &StorageConfig::default(),
            format!("sqlite:memory:{}", Uuid::new_v4()),
        )
    }

    fn from_connection(conn: Connection, config: &StorageConfig, store_id: String) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let backend = Self {
            conn: Mutex::new(conn),
            store_id,
        };
        backend.initialize()?;
        Ok(backend)
    }

    /// Create the keyward tables if they are missing. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Run raw SQL, e.g. to create application tables in tests.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Borrow the connection for work the traits do not cover.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }

    fn rows<T>(&self, f: impl FnOnce(&SqliteRows<'_>) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&SqliteRows::new(&conn, &self.store_id, false))
    }

    fn lock(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("store_id", &self.store_id)
            .finish_non_exhaustive()
    }
}

/// Run `work` inside `BEGIN IMMEDIATE`, committing on `Ok`.
pub(crate) fn immediate<T>(
    conn: &Connection,
    work: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match work(conn) {
        Ok(value) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn opt_ts(raw: Option<String>) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    raw.as_deref().map(super::parse_ts).transpose()
}

pub(crate) fn corrupt(what: &str, value: &str) -> crate::Error {
    StorageError::Corrupt(format!("unexpected {} {:?}", what, value)).into()
}

pub(crate) fn scalar_u64(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<u64> {
    let n: Option<i64> = conn.query_row(sql, params, |row| row.get(0)).optional()?;
    Ok(n.unwrap_or(0).max(0) as u64)
}
