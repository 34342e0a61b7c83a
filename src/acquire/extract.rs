//! Turns captured result payloads into listing rows.
//!
//! A payload is a JSON object carrying its listings under `items` (older
//! responses use `results`). Listing fields are camelCase; history arrays
//! sometimes arrive JSON-encoded inside a string.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::listing::{HistoryEntry, Row};
use crate::normalize;
use crate::vin;

/// Parse one payload body. Bodies that are not JSON, or carry no listing
/// array, yield no rows.
pub fn rows_from_body(body: &str, snapshot_date: NaiveDate) -> Vec<Row> {
    let payload: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "captured body is not valid json, skipping");
            return Vec::new();
        }
    };

    rows_from_payload(&payload, snapshot_date)
}

pub fn rows_from_payload(payload: &Value, snapshot_date: NaiveDate) -> Vec<Row> {
    let items = ["items", "results"]
        .iter()
        .filter_map(|key| payload.get(key).and_then(Value::as_array))
        .find(|items| !items.is_empty());

    let Some(items) = items else {
        debug!("payload has no listings");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| row_from_item(item, snapshot_date))
        .collect()
}

fn row_from_item(item: &Map<String, Value>, snapshot_date: NaiveDate) -> Row {
    let get = |key: &str| item.get(key).unwrap_or(&Value::Null);
    let text = |key: &str| normalize::text(get(key));

    let details: String = ["detailsShort", "detailsMid", "detailsLong"]
        .iter()
        .filter_map(|key| get(key).as_str())
        .collect();

    Row {
        vin: vin::clean(get("vin").as_str()),
        snapshot_date: Some(snapshot_date),
        year: normalize::integer(get("year")).and_then(|y| i32::try_from(y).ok()),
        make: text("make").map(|m| normalize::title_case(&m)),
        model: text("model").map(|m| normalize::title_case(&m)),
        price: normalize::price(get("price")),
        mileage: normalize::mileage(get("mileage")),
        location: text("location"),
        source_name: text("sourceName"),
        title: text("title"),
        details: Some(details.trim().to_string()).filter(|d| !d.is_empty()),
        listing_date: text("date"),
        location_code: text("locationCode"),
        country_code: text("countryCode"),
        pending_sale: normalize::flag(get("pendingSale")),
        current_bid: normalize::number(get("currentBid")),
        bids: normalize::integer(get("bids")),
        distance: normalize::number(get("distance")),
        price_recent_change: normalize::flag(get("priceRecentChange")),
        seller_type: text("sellerType"),
        vehicle_title: text("vehicleTitle"),
        listing_type: text("listingType"),
        vehicle_title_desc: text("vehicleTitleDesc"),
        img: text("img"),
        price_history: history(get("priceHistory")),
        listing_history: history(get("listingHistory")),
    }
}

fn history(value: &Value) -> Vec<HistoryEntry> {
    let decoded;
    let entries = match value {
        Value::Array(entries) => entries,
        Value::String(s) if !s.trim().is_empty() => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(entries)) => {
                decoded = entries;
                &decoded
            }
            Ok(_) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "history string is not valid json");
                return Vec::new();
            }
        },
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter_map(Value::as_object)
        .map(|h| {
            let get = |key: &str| h.get(key).unwrap_or(&Value::Null);
            HistoryEntry {
                date: normalize::text(get("date")),
                mileage: normalize::mileage(get("mileage")),
                price: normalize::price(get("price")),
                trend: normalize::text(get("trend")),
            }
        })
        .collect()
}
