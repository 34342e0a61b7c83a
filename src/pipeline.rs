//! Wires configuration, store, driver and engine into the runnable commands.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::acquire::{extract, AcquireReport, RenderingSurface, ReplaySurface, SourceConvergenceDriver};
use crate::config::{Config, ConfigError};
use crate::enrich::{EnrichReport, EnrichmentEngine, LookupError, NhtsaClient, VehicleLookup};
use crate::store::{RecordStore, StoreError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("lookup client: {0}")]
    Lookup(#[from] LookupError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Everything one run shares: resolved configuration, the open store, the
/// date snapshots are stamped with and the flag an interrupt handler sets.
pub struct Session {
    pub config: Config,
    pub store: Arc<RecordStore>,
    pub run_date: NaiveDate,
    pub interrupt: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: Config, store: Arc<RecordStore>, run_date: NaiveDate) -> Self {
        Session {
            config,
            store,
            run_date,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the configured database and date the run today (local time).
    pub fn open(config: Config) -> Result<Self, PipelineError> {
        let path = config.store.db_path()?;
        let store = RecordStore::open(&path)?;
        let today = chrono::Local::now().date_naive();
        Ok(Session::new(config, Arc::new(store), today))
    }
}

pub fn acquire<S: RenderingSurface>(session: &Session, surface: S) -> Result<AcquireReport, PipelineError> {
    let mut driver = SourceConvergenceDriver::new(session, surface);
    Ok(driver.run()?)
}

pub fn acquire_replay(session: &Session, dir: &Path) -> Result<AcquireReport, PipelineError> {
    let surface = ReplaySurface::open(dir).map_err(|source| PipelineError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    acquire(session, surface)
}

pub fn enrich<L: VehicleLookup>(session: &Session, lookup: L) -> Result<EnrichReport, PipelineError> {
    let engine = EnrichmentEngine::new(session, lookup);
    Ok(engine.run()?)
}

/// Enrich against the public NHTSA services.
pub fn enrich_online(session: &Session) -> Result<EnrichReport, PipelineError> {
    let client = NhtsaClient::new(session.config.enrich.request_timeout)?;
    enrich(session, client)
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub snapshot_date: NaiveDate,
    pub rows: usize,
    pub written: usize,
}

/// Load a saved response payload through the same extraction and upsert
/// path as live acquisition.
pub fn import(session: &Session, path: &Path, date: Option<NaiveDate>) -> Result<ImportReport, PipelineError> {
    let body = std::fs::read_to_string(path).map_err(|source| PipelineError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let snapshot_date = date.unwrap_or(session.run_date);
    let rows = extract::rows_from_body(&body, snapshot_date);
    let written = session.store.upsert_snapshots(&rows)?;

    info!(path = %path.display(), %snapshot_date, rows = rows.len(), written, "imported payload");

    Ok(ImportReport {
        snapshot_date,
        rows: rows.len(),
        written,
    })
}
