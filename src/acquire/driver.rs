//! Drives every sub-source on the results page until none yields more.
//!
//! Each round attempts the "more results" control of every sub-source not
//! yet exhausted. A sub-source whose control is absent, or stays
//! uninteractable through the retry budget, is exhausted for the rest of the
//! run. A round in which no control could be triggered ends the run
//! (`Converged`). After every productive round the captured responses are
//! extracted and written to the store.
//!
//! A disconnected surface ends the run immediately (`Aborted`); whatever was
//! captured up to that point is still extracted and written. The same holds
//! for an interrupt, which is checked before every control attempt.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::NaiveDate;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::extract;
use super::monitor::{PerformanceMonitor, RunSummary};
use super::retry::{with_retries, Attempt};
use super::surface::{RenderingSurface, SubSource, SurfaceError, SUB_SOURCES};
use crate::config::AcquireConfig;
use crate::listing::Row;
use crate::pipeline::Session;
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    Idle,
    RoundInProgress,
    Extracting,
    Converged,
    Aborted,
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DriverState::Converged | DriverState::Aborted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquireReport {
    pub state: DriverState,
    /// Rounds in which at least one control was triggered.
    pub productive_rounds: usize,
    pub responses: usize,
    pub rows_extracted: usize,
    pub rows_written: usize,
    pub new_today: usize,
    pub exhausted: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub performance: RunSummary,
}

#[derive(Default)]
struct Extracted {
    responses: usize,
    rows: usize,
    written: usize,
    new_today: usize,
}

pub struct SourceConvergenceDriver<S> {
    surface: S,
    store: Arc<RecordStore>,
    settings: AcquireConfig,
    search_url: String,
    run_date: NaiveDate,
    sub_sources: Vec<SubSource>,

    state: DriverState,
    exhausted: BTreeSet<&'static str>,
    seen_response_ids: HashSet<String>,
    seen_vins: HashSet<String>,
    observed_today: HashSet<String>,
    monitor: PerformanceMonitor,
    interrupt: Arc<AtomicBool>,
}

impl<S: RenderingSurface> SourceConvergenceDriver<S> {
    pub fn new(session: &Session, surface: S) -> Self {
        SourceConvergenceDriver {
            surface,
            store: Arc::clone(&session.store),
            settings: session.config.acquire.clone(),
            search_url: session.config.search.url(),
            run_date: session.run_date,
            sub_sources: SUB_SOURCES.to_vec(),
            state: DriverState::Idle,
            exhausted: BTreeSet::new(),
            seen_response_ids: HashSet::new(),
            seen_vins: HashSet::new(),
            observed_today: HashSet::new(),
            monitor: PerformanceMonitor::new(),
            interrupt: Arc::clone(&session.interrupt),
        }
    }

    /// Restrict the run to these sub-sources instead of the full catalog.
    pub fn with_sub_sources(mut self, sub_sources: Vec<SubSource>) -> Self {
        self.sub_sources = sub_sources;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn exhausted(&self) -> &BTreeSet<&'static str> {
        &self.exhausted
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Run until convergence, a connectivity fault or an interrupt. Only
    /// store failures are returned as errors, after a last attempt to write
    /// what was captured; surface faults and interrupts end the run as
    /// `Aborted`.
    pub fn run(&mut self) -> Result<AcquireReport, StoreError> {
        let mut totals = Extracted::default();
        let mut productive_rounds = 0usize;
        let mut abort_reason = None;
        let mut store_error = None;

        self.observed_today = self.store.vins_observed_on(self.run_date)?;
        info!(
            url = %self.search_url,
            sub_sources = self.sub_sources.len(),
            already_observed = self.observed_today.len(),
            headless = self.settings.headless,
            "starting acquisition"
        );

        if let Err(e) = self.open_page() {
            abort_reason = Some(self.abort(&e));
        }

        while !self.state.is_terminal() {
            if self.interrupted() {
                abort_reason = Some(self.stop_on_interrupt());
                break;
            }

            let started = Instant::now();
            self.state = DriverState::RoundInProgress;
            let round = productive_rounds + 1;
            let remaining = self.sub_sources.len().saturating_sub(self.exhausted.len());
            info!(round, remaining, "starting round");

            let outcome = self.run_round();
            if outcome.is_ok() && self.interrupted() {
                // a round cut short says nothing about convergence
                abort_reason = Some(self.stop_on_interrupt());
                break;
            }

            match outcome {
                Ok(true) => productive_rounds += 1,
                Ok(false) => {
                    info!(round, "no sub-source yielded more results, finishing");
                    self.state = DriverState::Converged;
                    break;
                }
                Err(e) => {
                    abort_reason = Some(self.abort(&e));
                    break;
                }
            }

            self.state = DriverState::Extracting;
            let extracted = match self.extract() {
                Ok(extracted) => extracted,
                Err(Fault::Surface(e)) => {
                    abort_reason = Some(self.abort(&e));
                    break;
                }
                Err(Fault::Store(e)) => {
                    error!(error = %e, "could not write extracted rows, stopping acquisition");
                    self.state = DriverState::Aborted;
                    abort_reason = Some(e.to_string());
                    store_error = Some(e);
                    break;
                }
            };
            totals.add(&extracted);

            if let Err(e) = self.cleanup_captured(round) {
                abort_reason = Some(self.abort(&e));
                break;
            }

            self.monitor
                .record_round(round, started.elapsed(), extracted.rows, extracted.written);

            self.pause();
        }

        // final drain: responses from the last round, from the initial page
        // load when no round was productive, or left over by a failed write
        match self.extract() {
            Ok(extracted) => totals.add(&extracted),
            Err(e) => warn!(error = %e, "could not write remaining captured responses"),
        }

        let performance = self.monitor.log_summary();
        info!(
            state = ?self.state,
            productive_rounds,
            rows = totals.rows,
            written = totals.written,
            new_today = totals.new_today,
            exhausted = self.exhausted.len(),
            "acquisition finished"
        );

        if let Some(e) = store_error {
            return Err(e);
        }

        Ok(AcquireReport {
            state: self.state,
            productive_rounds,
            responses: totals.responses,
            rows_extracted: totals.rows,
            rows_written: totals.written,
            new_today: totals.new_today,
            exhausted: self.exhausted.iter().copied().collect(),
            abort_reason,
            performance,
        })
    }

    fn open_page(&mut self) -> Result<(), SurfaceError> {
        self.surface.navigate(&self.search_url)?;
        if !self.surface.wait_for_idle(self.settings.idle_timeout)? {
            warn!("page did not settle after navigation");
        }
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn stop_on_interrupt(&mut self) -> String {
        warn!("interrupted, writing captured rows before stopping");
        self.state = DriverState::Aborted;
        "interrupted".to_string()
    }

    fn abort(&mut self, e: &dyn std::fmt::Display) -> String {
        error!(error = %e, "connectivity fault, stopping acquisition");
        self.state = DriverState::Aborted;
        e.to_string()
    }

    /// One pass over the sub-sources. Returns whether any control fired.
    fn run_round(&mut self) -> Result<bool, SurfaceError> {
        let mut productive = false;
        let max_retries = self.settings.max_retries;

        for source in self.sub_sources.clone() {
            if self.interrupted() {
                break;
            }
            if self.exhausted.contains(source.id) {
                continue;
            }

            match with_retries(max_retries, |attempt| self.attempt_control(&source, attempt))? {
                Attempt::Success(()) => {
                    info!(sub_source = source.name, "loaded more results");
                    productive = true;
                }
                Attempt::DefinitiveFailure(reason) | Attempt::TransientFailure(reason) => {
                    info!(sub_source = source.name, %reason, "sub-source exhausted");
                    self.exhausted.insert(source.id);
                }
            }
        }

        Ok(productive)
    }

    fn attempt_control(&mut self, source: &SubSource, attempt: u32) -> Result<Attempt<()>, SurfaceError> {
        debug!(sub_source = source.name, attempt, "attempting control");

        match self.surface.dismiss_overlay() {
            Ok(true) => debug!("dismissed overlay"),
            Ok(false) => {}
            Err(e) => return transient_or_fatal(e),
        }

        let control = match self.surface.find_control(source) {
            Ok(Some(control)) => control,
            Ok(None) => return Ok(Attempt::DefinitiveFailure("control not found".to_string())),
            Err(e) => return transient_or_fatal(e),
        };

        match self.surface.trigger(&control) {
            Ok(true) => {}
            // a click that did not register is retried; the retry budget
            // still exhausts a control that never responds
            Ok(false) => return Ok(Attempt::TransientFailure("control did not respond".to_string())),
            Err(e) => return transient_or_fatal(e),
        }

        // the trigger already happened; repeating it would skip a page
        match self.surface.wait_for_idle(self.settings.idle_timeout) {
            Ok(true) => {}
            Ok(false) => warn!(sub_source = source.name, "page did not settle after trigger"),
            Err(SurfaceError::Transient(reason)) => {
                warn!(sub_source = source.name, %reason, "wait after trigger failed")
            }
            Err(e) => return Err(e),
        }

        Ok(Attempt::Success(()))
    }

    /// Read new captured responses, dedupe by vin within the run and write
    /// the rows. If the write fails the responses stay unprocessed, so a
    /// later call picks them up again.
    fn extract(&mut self) -> Result<Extracted, Fault> {
        let events = self.surface.captured_network_events(&self.settings.capture_filter)?;
        let mut extracted = Extracted::default();
        let mut rows: Vec<Row> = Vec::new();
        let mut new_ids: Vec<String> = Vec::new();

        for event in events {
            if !self.seen_response_ids.insert(event.id.clone()) {
                continue;
            }
            new_ids.push(event.id.clone());
            extracted.responses += 1;

            let found = extract::rows_from_body(&event.body, self.run_date);
            debug!(response = %event.id, rows = found.len(), "captured response");
            rows.extend(found);
        }

        extracted.rows = rows.len();
        let rows = self.dedupe(rows, &mut extracted.new_today);

        if !rows.is_empty() {
            extracted.written = match self.store.upsert_snapshots(&rows) {
                Ok(written) => written,
                Err(e) => {
                    self.forget(&new_ids, &rows);
                    return Err(e.into());
                }
            };
            info!(
                responses = extracted.responses,
                rows = extracted.rows,
                written = extracted.written,
                new_today = extracted.new_today,
                "extracted rows"
            );
        }

        Ok(extracted)
    }

    // the same listing can surface in several sub-sources; keep the first
    fn dedupe(&mut self, rows: Vec<Row>, new_today: &mut usize) -> Vec<Row> {
        rows.into_iter()
            .filter(|row| {
                if !row.has_valid_vin() {
                    return true;
                }
                let Some((vin, _)) = row.key() else {
                    return true;
                };
                if !self.seen_vins.insert(vin.to_string()) {
                    return false;
                }
                if !self.observed_today.contains(vin) {
                    *new_today += 1;
                }
                true
            })
            .collect()
    }

    // undo the bookkeeping of an extraction whose rows were not written
    fn forget(&mut self, response_ids: &[String], rows: &[Row]) {
        for id in response_ids {
            self.seen_response_ids.remove(id);
        }
        for row in rows.iter().filter(|row| row.has_valid_vin()) {
            if let Some((vin, _)) = row.key() {
                self.seen_vins.remove(vin);
            }
        }
    }

    fn cleanup_captured(&mut self, round: usize) -> Result<(), SurfaceError> {
        let interval = self.settings.capture_cleanup_interval as usize;
        if interval > 0 && round % interval == 0 {
            self.surface.clear_captured()?;
            debug!(round, "cleared captured responses");
        }
        Ok(())
    }

    fn pause(&self) {
        let (min, max) = (self.settings.round_delay_min, self.settings.round_delay_max);
        if max.is_zero() {
            return;
        }

        let delay = if min >= max {
            max
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        debug!(secs = format_args!("{:.2}", delay.as_secs_f64()), "waiting before next round");
        thread::sleep(delay);
    }
}

impl Extracted {
    fn add(&mut self, other: &Extracted) {
        self.responses += other.responses;
        self.rows += other.rows;
        self.written += other.written;
        self.new_today += other.new_today;
    }
}

/// Anything that ends a run: a dead surface or a failing store.
#[derive(Debug, thiserror::Error)]
enum Fault {
    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn transient_or_fatal(e: SurfaceError) -> Result<Attempt<()>, SurfaceError> {
    match e {
        SurfaceError::Transient(reason) => Ok(Attempt::TransientFailure(reason)),
        fatal => Err(fatal),
    }
}
