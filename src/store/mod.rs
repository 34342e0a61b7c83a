//! SQLite record store.
//!
//! Persists listing observations to a local SQLite database with four tables:
//! - snapshots: one row per (vin, snapshot_date), replaced on re-observation
//! - price_history / listing_history: insert-only, duplicates ignored
//! - enrichment: one row per vin, written by the enrichment engine
//!
//! Writes within one call share a transaction, but each row runs in its own
//! savepoint: a row that fails to persist is logged and rolled back alone
//! while the rest of the batch commits.
//!
//! The connection sits behind a mutex so acquisition and enrichment can
//! write from different threads without interleaving transactions.

pub mod enrichment;
pub mod schema;
pub mod snapshot;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;
use tracing::debug;

pub use stats::StoreStats;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not determine data directory")]
    NoDataDir,
}

/// Get the database path (~/.local/share/lotwatch/lotwatch.db or platform equivalent)
pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let data_dir = directories::ProjectDirs::from("", "", "lotwatch")
        .ok_or(StoreError::NoDataDir)?
        .data_dir()
        .to_path_buf();

    Ok(data_dir.join("lotwatch.db"))
}

/// Database handle. Open once per run and share by reference.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
        debug!(path = %path.display(), "opened record store");

        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        schema::init(&conn)?;
        Ok(RecordStore {
            conn: Mutex::new(conn),
        })
    }

    // a panic mid-write leaves no open transaction behind (it rolls back on
    // drop), so a poisoned connection is still safe to use
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
