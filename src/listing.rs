use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::vin;

/// One observation of a listing on a given date.
///
/// `vin` and `snapshot_date` form the natural key. A row missing either is
/// kept in memory for counting but never written as a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub vin: Option<String>,
    pub snapshot_date: Option<NaiveDate>,
    pub year: Option<i32>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub price: Option<f64>,
    pub mileage: Option<i64>,
    pub location: Option<String>,
    pub source_name: Option<String>,

    pub title: Option<String>,
    pub details: Option<String>,
    pub listing_date: Option<String>,
    pub location_code: Option<String>,
    pub country_code: Option<String>,
    pub pending_sale: Option<bool>,
    pub current_bid: Option<f64>,
    pub bids: Option<i64>,
    pub distance: Option<f64>,
    pub price_recent_change: Option<bool>,
    pub seller_type: Option<String>,
    pub vehicle_title: Option<String>,
    pub listing_type: Option<String>,
    pub vehicle_title_desc: Option<String>,
    pub img: Option<String>,

    #[serde(default)]
    pub price_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub listing_history: Vec<HistoryEntry>,
}

/// A point in a listing's price or listing history, as repeated by the
/// source on every render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: Option<String>,
    pub mileage: Option<i64>,
    pub price: Option<f64>,
    pub trend: Option<String>,
}

impl Row {
    pub fn new(vin: &str, snapshot_date: NaiveDate) -> Self {
        Row {
            vin: Some(vin.to_string()),
            snapshot_date: Some(snapshot_date),
            ..Row::default()
        }
    }

    /// The `(vin, snapshot_date)` key, if both parts are present and the vin is non-blank.
    pub fn key(&self) -> Option<(&str, NaiveDate)> {
        let vin = self.vin.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
        Some((vin, self.snapshot_date?))
    }

    /// True when the vin identifies a real vehicle and can be deduplicated
    /// and enriched.
    pub fn has_valid_vin(&self) -> bool {
        self.vin.as_deref().is_some_and(vin::is_valid)
    }
}
