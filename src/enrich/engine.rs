//! Fills enrichment records for the store's backlog.
//!
//! The backlog is split into decode-sized batches that a fixed pool of
//! scoped worker threads pulls from a shared index. For each batch a worker
//! decodes the vins in one request, resolves the auxiliary lookups once per
//! distinct model (consulting the shared cache first), merges everything per
//! vin and writes the whole batch to the store in one call.
//!
//! Lookup failures never abort the pass. A failed decode leaves the batch's
//! vins with empty records; a failed auxiliary lookup only leaves that part
//! of the record empty.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::fields::{Auxiliary, ComplaintSummary, EnrichmentFields, ModelKey, RecallSummary, SafetySummary};
use super::gate::{AuxKind, SharedGate};
use super::lookup::{LookupError, VehicleLookup};
use crate::pipeline::Session;
use crate::store::{RecordStore, StoreError};
use crate::vin;

/// Totals for one enrichment pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichReport {
    pub backlog: usize,
    pub batches: usize,
    pub written: usize,
    pub decoded: usize,
    pub unresolved: usize,
    pub lookup_calls: usize,
    pub lookup_failures: usize,
    pub cache_hits: usize,
    pub failed_batches: usize,
    #[serde(skip)]
    pub duration: Duration,
}

#[derive(Default)]
struct Counters {
    lookup_calls: AtomicUsize,
    lookup_failures: AtomicUsize,
    cache_hits: AtomicUsize,
}

struct BatchOutcome {
    index: usize,
    decoded: usize,
    unresolved: usize,
    written: Result<usize, StoreError>,
}

pub struct EnrichmentEngine<L> {
    store: Arc<RecordStore>,
    lookup: L,
    gate: SharedGate,
    workers: usize,
    batch_size: usize,
    counters: Counters,
}

impl<L: VehicleLookup> EnrichmentEngine<L> {
    pub fn new(session: &Session, lookup: L) -> Self {
        let settings = &session.config.enrich;
        EnrichmentEngine {
            store: Arc::clone(&session.store),
            lookup,
            gate: SharedGate::new(settings.rate_limit),
            workers: settings.workers.max(1),
            batch_size: settings.effective_batch_size(),
            counters: Counters::default(),
        }
    }

    /// Enrich every vin currently in the backlog.
    ///
    /// Only a failure to read the backlog is returned as an error; a batch
    /// that cannot be written is logged and its vins stay in the backlog for
    /// the next pass.
    pub fn run(&self) -> Result<EnrichReport, StoreError> {
        let start = Instant::now();
        let backlog = self.store.backlog_vins()?;

        let mut report = EnrichReport {
            backlog: backlog.len(),
            ..EnrichReport::default()
        };

        if backlog.is_empty() {
            info!("enrichment backlog is empty");
            return Ok(report);
        }

        let batches: Vec<&[String]> = backlog.chunks(self.batch_size).collect();
        let workers = self.workers.min(batches.len()).max(1);
        report.batches = batches.len();

        info!(
            vins = backlog.len(),
            batches = batches.len(),
            workers,
            "starting enrichment"
        );

        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<BatchOutcome>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                let batches = &batches;

                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(batch) = batches.get(index) else {
                        break;
                    };
                    if tx.send(self.process_batch(index, batch)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for outcome in rx {
                report.decoded += outcome.decoded;
                report.unresolved += outcome.unresolved;
                match outcome.written {
                    Ok(written) => {
                        report.written += written;
                        info!(
                            batch = outcome.index + 1,
                            of = batches.len(),
                            written,
                            "batch enriched"
                        );
                    }
                    Err(e) => {
                        report.failed_batches += 1;
                        error!(batch = outcome.index + 1, error = %e, "failed to write enrichment batch");
                    }
                }
            }
        });

        report.lookup_calls = self.counters.lookup_calls.load(Ordering::Relaxed);
        report.lookup_failures = self.counters.lookup_failures.load(Ordering::Relaxed);
        report.cache_hits = self.counters.cache_hits.load(Ordering::Relaxed);
        report.duration = start.elapsed();

        info!(
            written = report.written,
            decoded = report.decoded,
            unresolved = report.unresolved,
            lookup_calls = report.lookup_calls,
            cache_hits = report.cache_hits,
            models = self.gate.cached_len(),
            elapsed = %humantime::format_duration(Duration::from_secs(report.duration.as_secs())),
            "enrichment finished"
        );

        Ok(report)
    }

    fn process_batch(&self, index: usize, batch: &[String]) -> BatchOutcome {
        // every vin in the batch gets a record, even if nothing resolves
        let mut records: BTreeMap<String, EnrichmentFields> = BTreeMap::new();
        let mut request: Vec<String> = Vec::with_capacity(batch.len());

        for vin in batch {
            if vin::is_valid(vin) {
                records.insert(vin.clone(), EnrichmentFields::default());
                request.push(vin.clone());
            } else {
                debug!(vin, "placeholder vin left out of decode request");
            }
        }

        let mut matched: HashSet<&str> = HashSet::new();
        if !request.is_empty() {
            // the decoder echoes vins upper-cased
            let requested: HashMap<String, &str> = request
                .iter()
                .map(|v| (v.trim().to_uppercase(), v.as_str()))
                .collect();

            let response = self.call("decode", || self.lookup.decode_batch(&request));
            for vehicle in response.unwrap_or_default() {
                let Some(&vin) = requested.get(&vehicle.vin.trim().to_uppercase()) else {
                    debug!(vin = %vehicle.vin, "decoder returned a vin that was not requested");
                    continue;
                };
                if !matched.insert(vin) {
                    debug!(vin, "decoder repeated a vin, keeping the first result");
                    continue;
                }
                if let Some(record) = records.get_mut(vin) {
                    *record = EnrichmentFields::from_decoded(&vehicle);
                }
            }
        }
        let decoded = matched.len();

        let models: BTreeSet<ModelKey> = records.values().filter_map(EnrichmentFields::model_key).collect();

        for key in &models {
            for kind in AuxKind::ALL {
                let Some(aux) = self.auxiliary(kind, key) else {
                    continue;
                };
                for record in records.values_mut() {
                    if record.model_key().as_ref() == Some(key) {
                        record.apply(aux.clone());
                    }
                }
            }
        }

        // matched only holds requested vins
        let unresolved = request.len() - decoded;
        if unresolved > 0 {
            debug!(batch = index + 1, unresolved, "vins without decode results are marked with empty records");
        }

        BatchOutcome {
            index,
            decoded,
            unresolved,
            written: self.store.upsert_enrichment_batch(&records),
        }
    }

    /// Cached auxiliary result for `key`, fetching it on a miss. A failed
    /// lookup is cached as no data for the rest of the pass.
    fn auxiliary(&self, kind: AuxKind, key: &ModelKey) -> Option<Auxiliary> {
        if let Some(hit) = self.gate.cached(kind, key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        let fetched = match kind {
            AuxKind::Safety => self.fetch_safety(key),
            AuxKind::Recalls => self
                .call(kind.name(), || self.lookup.recalls(key))
                .map(|r| Auxiliary::Recalls(RecallSummary::from_recalls(&r))),
            AuxKind::Complaints => self
                .call(kind.name(), || self.lookup.complaints(key))
                .map(|c| Auxiliary::Complaints(ComplaintSummary::from_complaints(&c))),
        };

        if fetched.is_none() {
            warn!(model = %key, lookup = kind.name(), "no {} data for model this pass", kind.name());
        }
        self.gate.store(kind, key, fetched)
    }

    // variant list, then the rating detail of the first variant
    fn fetch_safety(&self, key: &ModelKey) -> Option<Auxiliary> {
        let variants = self.call("safety variants", || self.lookup.rated_variants(key))?;

        let rating = match variants.first() {
            Some(first) => self.call("safety rating", || self.lookup.safety_rating(first.vehicle_id))?,
            None => None,
        };

        Some(Auxiliary::Safety(SafetySummary::from_ratings(variants.len(), rating.as_ref())))
    }

    /// One rate-limited outbound request. Errors are logged and become `None`.
    fn call<T>(&self, what: &str, request: impl FnOnce() -> Result<T, LookupError>) -> Option<T> {
        self.gate.pace();
        self.counters.lookup_calls.fetch_add(1, Ordering::Relaxed);

        match request() {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.lookup_failures.fetch_add(1, Ordering::Relaxed);
                warn!(lookup = what, error = %e, "lookup failed, treating as no data");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::enrich::lookup::{Complaint, DecodedVehicle, RatedVariant, Recall, SafetyRating};
    use crate::listing::Row;
    use chrono::NaiveDate;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Decodes every requested vin to one fixed model unless listed as
    /// unknown, and counts calls per lookup.
    #[derive(Default)]
    struct FakeLookup {
        unknown: HashSet<String>,
        fail_decode: bool,
        fail_recalls: bool,
        repeat_decoded: bool,
        calls: Mutex<HashMap<&'static str, usize>>,
        decode_requests: Mutex<Vec<Vec<String>>>,
    }

    impl FakeLookup {
        fn count(&self, name: &'static str) -> usize {
            self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
        }

        fn bump(&self, name: &'static str) {
            *self.calls.lock().unwrap().entry(name).or_default() += 1;
        }
    }

    impl VehicleLookup for FakeLookup {
        fn decode_batch(&self, vins: &[String]) -> Result<Vec<DecodedVehicle>, LookupError> {
            self.bump("decode");
            self.decode_requests.lock().unwrap().push(vins.to_vec());
            if self.fail_decode {
                return Err(LookupError::Timeout("decode".into()));
            }

            let copies = if self.repeat_decoded { 2 } else { 1 };
            Ok(vins
                .iter()
                .filter(|v| !self.unknown.contains(*v))
                .flat_map(|v| std::iter::repeat(v).take(copies))
                .map(|v| {
                    let mut fields = std::collections::BTreeMap::new();
                    fields.insert("Trim".to_string(), "EX".to_string());
                    // the real decoder reports vins upper-cased
                    DecodedVehicle {
                        vin: v.to_uppercase(),
                        make: Some("HONDA".into()),
                        model: Some("Civic".into()),
                        model_year: Some("2015".into()),
                        fields,
                    }
                })
                .collect())
        }

        fn rated_variants(&self, _key: &ModelKey) -> Result<Vec<RatedVariant>, LookupError> {
            self.bump("variants");
            Ok(vec![
                RatedVariant { vehicle_id: 9001, description: "4 DR FWD".into() },
                RatedVariant { vehicle_id: 9002, description: "2 DR FWD".into() },
            ])
        }

        fn safety_rating(&self, vehicle_id: i64) -> Result<Option<SafetyRating>, LookupError> {
            self.bump("rating");
            assert_eq!(vehicle_id, 9001);
            Ok(Some(SafetyRating {
                overall: Some("5".into()),
                ..SafetyRating::default()
            }))
        }

        fn recalls(&self, _key: &ModelKey) -> Result<Vec<Recall>, LookupError> {
            self.bump("recalls");
            if self.fail_recalls {
                return Err(LookupError::Transport("connection reset".into()));
            }
            Ok(vec![Recall {
                campaign: Some("15V001000".into()),
                component: Some("AIR BAGS".into()),
                report_date: Some("05/01/2015".into()),
            }])
        }

        fn complaints(&self, _key: &ModelKey) -> Result<Vec<Complaint>, LookupError> {
            self.bump("complaints");
            Ok(vec![])
        }
    }

    fn vin(n: usize) -> String {
        format!("2HGFB2F5XFH{n:06}")
    }

    fn session(vins: &[String], workers: usize, batch_size: usize) -> Session {
        let store = RecordStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows: Vec<Row> = vins.iter().map(|v| Row::new(v, date)).collect();
        store.upsert_snapshots(&rows).unwrap();

        let mut config = Config::default();
        config.enrich.workers = workers;
        config.enrich.batch_size = batch_size;
        config.enrich.rate_limit = Duration::ZERO;

        Session::new(config, Arc::new(store), date)
    }

    #[test]
    fn shared_model_is_looked_up_at_most_once_per_worker() {
        let vins: Vec<String> = (0..40).map(vin).collect();
        let session = session(&vins, 4, 5);
        let engine = EnrichmentEngine::new(&session, FakeLookup::default());

        let report = engine.run().unwrap();

        assert_eq!(report.backlog, 40);
        assert_eq!(report.batches, 8);
        assert_eq!(report.written, 40);
        assert_eq!(engine.lookup.count("decode"), 8);
        assert!(engine.lookup.count("recalls") <= 4);
        assert!(engine.lookup.count("complaints") <= 4);
        assert!(engine.lookup.count("variants") <= 4);
        assert!(session.store.backlog_vins().unwrap().is_empty());
    }

    #[test]
    fn single_worker_queries_each_model_exactly_once() {
        let vins: Vec<String> = (0..12).map(vin).collect();
        let session = session(&vins, 1, 3);
        let engine = EnrichmentEngine::new(&session, FakeLookup::default());

        let report = engine.run().unwrap();

        assert_eq!(engine.lookup.count("recalls"), 1);
        assert_eq!(engine.lookup.count("complaints"), 1);
        assert_eq!(engine.lookup.count("variants"), 1);
        assert_eq!(engine.lookup.count("rating"), 1);
        // 4 batches, the 3 later ones hit all three cached lookups
        assert_eq!(report.cache_hits, 9);
    }

    #[test]
    fn merges_decode_and_auxiliary_fields() {
        let vins = vec![vin(1)];
        let session = session(&vins, 1, 50);
        let engine = EnrichmentEngine::new(&session, FakeLookup::default());
        engine.run().unwrap();

        let record = session.store.get_enrichment(&vin(1)).unwrap().unwrap();
        assert_eq!(record.trim.as_deref(), Some("EX"));
        assert_eq!(record.model.as_deref(), Some("Civic"));

        let safety = record.safety.unwrap();
        assert_eq!(safety.ratings_count, 2);
        assert_eq!(safety.overall_rating.as_deref(), Some("5"));
        assert_eq!(record.recalls.unwrap().recall_components.as_deref(), Some("AIR BAGS"));
        assert_eq!(record.complaints.unwrap().total_complaints, 0);
    }

    #[test]
    fn vins_missing_from_decode_are_still_marked() {
        let vins = vec![vin(1), vin(2)];
        let session = session(&vins, 2, 50);
        let lookup = FakeLookup {
            unknown: [vin(2)].into_iter().collect(),
            ..FakeLookup::default()
        };
        let engine = EnrichmentEngine::new(&session, lookup);

        let report = engine.run().unwrap();

        assert_eq!(report.unresolved, 1);
        assert!(session.store.backlog_vins().unwrap().is_empty());
        assert!(session.store.get_enrichment(&vin(2)).unwrap().unwrap().is_empty());
    }

    #[test]
    fn failed_decode_marks_batch_with_empty_records() {
        let vins = vec![vin(1), vin(2)];
        let session = session(&vins, 1, 50);
        let lookup = FakeLookup {
            fail_decode: true,
            ..FakeLookup::default()
        };
        let engine = EnrichmentEngine::new(&session, lookup);

        let report = engine.run().unwrap();

        assert_eq!(report.written, 2);
        assert_eq!(report.lookup_failures, 1);
        assert_eq!(engine.lookup.count("recalls"), 0);
        assert!(session.store.backlog_vins().unwrap().is_empty());
    }

    #[test]
    fn auxiliary_failure_keeps_primary_result() {
        let vins = vec![vin(1)];
        let session = session(&vins, 1, 50);
        let lookup = FakeLookup {
            fail_recalls: true,
            ..FakeLookup::default()
        };
        let engine = EnrichmentEngine::new(&session, lookup);

        engine.run().unwrap();

        let record = session.store.get_enrichment(&vin(1)).unwrap().unwrap();
        assert_eq!(record.trim.as_deref(), Some("EX"));
        assert!(record.recalls.is_none());
        assert!(record.safety.is_some());
        assert!(record.complaints.is_some());
    }

    #[test]
    fn failed_auxiliary_lookup_is_made_once_per_pass() {
        let vins: Vec<String> = (0..40).map(vin).collect();
        let session = session(&vins, 1, 5);
        let lookup = FakeLookup {
            fail_recalls: true,
            ..FakeLookup::default()
        };
        let engine = EnrichmentEngine::new(&session, lookup);

        let report = engine.run().unwrap();

        assert_eq!(report.batches, 8);
        assert_eq!(engine.lookup.count("recalls"), 1);
        assert_eq!(report.lookup_failures, 1);
        assert!(session.store.get_enrichment(&vin(39)).unwrap().unwrap().recalls.is_none());
    }

    #[test]
    fn failed_auxiliary_calls_stay_bounded_by_workers() {
        let vins: Vec<String> = (0..40).map(vin).collect();
        let session = session(&vins, 4, 5);
        let lookup = FakeLookup {
            fail_recalls: true,
            ..FakeLookup::default()
        };
        let engine = EnrichmentEngine::new(&session, lookup);

        engine.run().unwrap();

        assert!(engine.lookup.count("recalls") <= 4);
    }

    #[test]
    fn repeated_decode_entries_count_once() {
        let vins = vec![vin(1), vin(2), vin(3)];
        let session = session(&vins, 2, 50);
        let lookup = FakeLookup {
            repeat_decoded: true,
            ..FakeLookup::default()
        };
        let engine = EnrichmentEngine::new(&session, lookup);

        let report = engine.run().unwrap();

        assert_eq!(report.decoded, 3);
        assert_eq!(report.unresolved, 0);
        assert_eq!(report.written, 3);
        assert_eq!(report.failed_batches, 0);
        assert!(session.store.backlog_vins().unwrap().is_empty());
    }

    #[test]
    fn lowercase_vin_matches_upper_cased_decode() {
        let lower = vin(7).to_lowercase();
        let mixed = "2hGfB2F5xFh000008".to_string();
        let session = session(&[lower.clone(), mixed.clone()], 1, 50);
        let engine = EnrichmentEngine::new(&session, FakeLookup::default());

        let report = engine.run().unwrap();

        assert_eq!(report.decoded, 2);
        assert_eq!(report.unresolved, 0);
        for stored in [&lower, &mixed] {
            let record = session.store.get_enrichment(stored).unwrap().unwrap();
            assert_eq!(record.trim.as_deref(), Some("EX"));
            assert_eq!(record.model.as_deref(), Some("Civic"));
        }
        assert!(session.store.backlog_vins().unwrap().is_empty());
    }

    #[test]
    fn placeholder_vins_never_reach_the_decoder() {
        let vins = vec![vin(1), "1HG*********".to_string()];
        let session = session(&vins, 1, 50);
        let engine = EnrichmentEngine::new(&session, FakeLookup::default());

        let report = engine.run().unwrap();

        assert_eq!(report.backlog, 1);
        let requests = engine.lookup.decode_requests.lock().unwrap();
        assert_eq!(requests.as_slice(), &[vec![vin(1)]]);
    }

    #[test]
    fn empty_backlog_makes_no_calls() {
        let session = session(&[], 4, 50);
        let engine = EnrichmentEngine::new(&session, FakeLookup::default());

        let report = engine.run().unwrap();

        assert_eq!(report.backlog, 0);
        assert_eq!(engine.lookup.count("decode"), 0);
    }
}
