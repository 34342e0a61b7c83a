//! Store-wide counts for the `status` command.

use chrono::NaiveDate;
use serde::Serialize;

use super::{RecordStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub snapshots: u64,
    pub distinct_vins: u64,
    pub snapshot_dates: u64,
    pub price_history: u64,
    pub listing_history: u64,
    pub enriched: u64,
    pub backlog: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_snapshot_date: Option<NaiveDate>,
}

impl RecordStore {
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        // backlog_vins takes the lock itself, so count it first
        let backlog = self.backlog_vins()?.len() as u64;

        let conn = self.lock();
        let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0));

        Ok(StoreStats {
            snapshots: count("SELECT COUNT(*) FROM snapshots")? as u64,
            distinct_vins: count("SELECT COUNT(DISTINCT vin) FROM snapshots")? as u64,
            snapshot_dates: count("SELECT COUNT(DISTINCT snapshot_date) FROM snapshots")? as u64,
            price_history: count("SELECT COUNT(*) FROM price_history")? as u64,
            listing_history: count("SELECT COUNT(*) FROM listing_history")? as u64,
            enriched: count("SELECT COUNT(*) FROM enrichment")? as u64,
            backlog,
            latest_snapshot_date: conn.query_row(
                "SELECT MAX(snapshot_date) FROM snapshots",
                [],
                |row| row.get(0),
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::fields::EnrichmentFields;
    use crate::listing::{HistoryEntry, Row};

    #[test]
    fn empty_store_has_zero_counts() {
        let store = RecordStore::open_in_memory().unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn counts_follow_writes() {
        let store = RecordStore::open_in_memory().unwrap();
        let day1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let mut row = Row::new("1FAKE000000000001", day1);
        row.price_history.push(HistoryEntry {
            date: Some("2023-12-20".into()),
            mileage: Some(40_000),
            price: Some(12_000.0),
            trend: None,
        });

        store
            .upsert_snapshots(&[
                row.clone(),
                Row { snapshot_date: Some(day2), ..row },
                Row::new("1FAKE000000000002", day2),
                Row::new("1FT**********", day2),
            ])
            .unwrap();
        store
            .upsert_enrichment("1FAKE000000000002", &EnrichmentFields::default())
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.snapshots, 4);
        assert_eq!(stats.distinct_vins, 3);
        assert_eq!(stats.snapshot_dates, 2);
        assert_eq!(stats.price_history, 1);
        assert_eq!(stats.listing_history, 0);
        assert_eq!(stats.enriched, 1);
        assert_eq!(stats.backlog, 1);
        assert_eq!(stats.latest_snapshot_date, Some(day2));
    }

    #[test]
    fn latest_date_serializes_as_iso_text() {
        let stats = StoreStats {
            snapshots: 1,
            latest_snapshot_date: NaiveDate::from_ymd_opt(2024, 3, 9),
            ..StoreStats::default()
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["latest_snapshot_date"], "2024-03-09");
        assert_eq!(json["snapshots"], 1);
    }
}
