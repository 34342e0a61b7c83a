use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use lotwatch::acquire::DriverState;
use lotwatch::config::Config;
use lotwatch::enrich::lookup::{Complaint, DecodedVehicle, RatedVariant, Recall, SafetyRating};
use lotwatch::enrich::{LookupError, ModelKey, VehicleLookup};
use lotwatch::pipeline::{self, Session};
use lotwatch::store::RecordStore;
use serde_json::json;

fn listing(vin: &str, price: u32) -> serde_json::Value {
    json!({
        "vin": vin,
        "year": 2016,
        "make": "TOYOTA",
        "model": "camry",
        "price": format!("${price}"),
        "mileage": "61,200 mi",
        "sourceName": "carvana",
        "priceHistory": [{"date": "2024-05-20", "price": price + 500}]
    })
}

fn write_page(root: &Path, source: &str, page: usize, items: Vec<serde_json::Value>) {
    let dir = root.join(source);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{page:03}.json")), json!({ "items": items }).to_string()).unwrap();
}

fn quiet_config() -> Config {
    let mut config = Config::default();
    config.acquire.round_delay_min = Duration::ZERO;
    config.acquire.round_delay_max = Duration::ZERO;
    config.enrich.rate_limit = Duration::ZERO;
    config
}

fn session_at(path: &Path, date: NaiveDate) -> Session {
    let store = RecordStore::open(path).unwrap();
    Session::new(quiet_config(), Arc::new(store), date)
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
}

/// Resolves every vin to the same Camry and counts outbound calls.
#[derive(Default)]
struct CamryLookup {
    calls: AtomicUsize,
}

impl VehicleLookup for CamryLookup {
    fn decode_batch(&self, vins: &[String]) -> Result<Vec<DecodedVehicle>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vins
            .iter()
            .map(|vin| DecodedVehicle {
                vin: vin.clone(),
                make: Some("TOYOTA".into()),
                model: Some("Camry".into()),
                model_year: Some("2016".into()),
                fields: BTreeMap::new(),
            })
            .collect())
    }

    fn rated_variants(&self, _key: &ModelKey) -> Result<Vec<RatedVariant>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    }

    fn safety_rating(&self, _vehicle_id: i64) -> Result<Option<SafetyRating>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    fn recalls(&self, _key: &ModelKey) -> Result<Vec<Recall>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LookupError::Timeout("recalls".into()))
    }

    fn complaints(&self, _key: &ModelKey) -> Result<Vec<Complaint>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Complaint {
            components: Some("ENGINE".into()),
            ..Complaint::default()
        }])
    }
}

#[test]
fn replay_acquire_then_enrich() {
    let dir = tempfile::tempdir().unwrap();
    let pages = dir.path().join("pages");
    write_page(&pages, "te", 0, vec![listing("4T1BF1FK0GU000001", 15_000)]);
    write_page(&pages, "te", 1, vec![listing("4T1BF1FK0GU000002", 16_000)]);
    write_page(&pages, "cv", 0, vec![listing("4T1BF1FK0GU000003", 17_000)]);
    write_page(&pages, "cv", 1, vec![listing("4T1BF1FK0GU000001", 15_000)]);
    write_page(&pages, "cv", 2, vec![listing("4T1BF1FK0GU000004", 18_000), listing("", 9_000)]);

    let session = session_at(&dir.path().join("cars.db"), date(1));
    let report = pipeline::acquire_replay(&session, &pages).unwrap();

    // te reveals one more page, cv two more
    assert_eq!(report.state, DriverState::Converged);
    assert_eq!(report.productive_rounds, 2);
    assert_eq!(report.responses, 5);
    assert_eq!(report.rows_extracted, 6);
    assert_eq!(report.rows_written, 4);

    let stats = session.store.stats().unwrap();
    assert_eq!(stats.snapshots, 4);
    assert_eq!(stats.backlog, 4);
    assert_eq!(stats.price_history, 4);

    let lookup = CamryLookup::default();
    let enriched = pipeline::enrich(&session, lookup).unwrap();
    assert_eq!(enriched.written, 4);

    let stats = session.store.stats().unwrap();
    assert_eq!(stats.enriched, 4);
    assert_eq!(stats.backlog, 0);

    let record = session.store.get_enrichment("4T1BF1FK0GU000002").unwrap().unwrap();
    assert_eq!(record.model.as_deref(), Some("Camry"));
    assert!(record.recalls.is_none());
    assert_eq!(record.complaints.unwrap().common_areas.as_deref(), Some("ENGINE"));
    assert_eq!(record.safety.unwrap().ratings_count, 0);
}

#[test]
fn second_day_builds_a_time_series() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cars.db");
    let pages = dir.path().join("pages");
    write_page(&pages, "eb", 0, vec![listing("4T1BF1FK0GU000001", 15_000)]);

    for day in [1, 2] {
        let session = session_at(&db, date(day));
        pipeline::acquire_replay(&session, &pages).unwrap();
    }

    let store = RecordStore::open(&db).unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.snapshots, 2);
    assert_eq!(stats.distinct_vins, 1);
    assert_eq!(stats.snapshot_dates, 2);
    // the repeated history entry is stored once
    assert_eq!(stats.price_history, 1);
    assert_eq!(stats.latest_snapshot_date, Some(date(2)));
}

#[test]
fn enrichment_runs_only_once_per_vin() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("capture.json");
    fs::write(
        &payload,
        json!({ "results": [listing("4T1BF1FK0GU000001", 15_000)] }).to_string(),
    )
    .unwrap();

    let session = session_at(&dir.path().join("cars.db"), date(1));
    pipeline::import(&session, &payload, None).unwrap();

    let first = CamryLookup::default();
    pipeline::enrich(&session, first).unwrap();

    // a later observation of the same vin does not put it back in the backlog
    pipeline::import(&session, &payload, Some(date(3))).unwrap();
    let second = CamryLookup::default();
    let report = pipeline::enrich(&session, second).unwrap();

    assert_eq!(report.backlog, 0);
    assert_eq!(report.lookup_calls, 0);
}

#[test]
fn import_stamps_requested_date() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("capture.json");
    fs::write(
        &payload,
        json!({ "items": [listing("4T1BF1FK0GU000001", 15_000), listing("VIN*******", 1)] }).to_string(),
    )
    .unwrap();

    let session = session_at(&dir.path().join("cars.db"), date(1));
    let report = pipeline::import(&session, &payload, Some(date(5))).unwrap();

    assert_eq!(report.rows, 2);
    assert_eq!(report.written, 2);
    assert!(session.store.get_snapshot("4T1BF1FK0GU000001", date(5)).unwrap().is_some());
    // the masked vin is stored but never queued for enrichment
    assert_eq!(session.store.backlog_vins().unwrap(), vec!["4T1BF1FK0GU000001".to_string()]);
}

#[test]
fn import_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_at(&dir.path().join("cars.db"), date(1));

    let err = pipeline::import(&session, &dir.path().join("missing.json"), None).unwrap_err();
    assert!(err.to_string().contains("missing.json"));
}
