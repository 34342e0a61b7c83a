use std::collections::HashSet;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::{RecordStore, StoreError};
use crate::listing::{HistoryEntry, Row};

impl RecordStore {
    /// Replace-insert a snapshot per row keyed by `(vin, snapshot_date)` and
    /// insert its nested history entries, ignoring duplicates.
    ///
    /// Rows missing a vin or snapshot date are skipped. A row whose write
    /// fails is rolled back on its own and logged; the rest still commit.
    /// Returns the number of snapshots written, replacements included.
    pub fn upsert_snapshots(&self, rows: &[Row]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock();
        let mut tx = conn.transaction()?;

        let mut written = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        for row in rows {
            let Some((vin, snapshot_date)) = row.key() else {
                skipped += 1;
                continue;
            };

            let sp = tx.savepoint()?;
            match write_row(&sp, vin, snapshot_date, row) {
                Ok(()) => {
                    sp.commit()?;
                    written += 1;
                }
                Err(e) => {
                    // dropping the savepoint rolls back this row only
                    failed += 1;
                    warn!(vin, %snapshot_date, error = %e, "failed to persist row, skipping");
                }
            }
        }

        tx.commit()?;

        if skipped > 0 {
            info!(skipped, "rows without vin or snapshot date were not persisted");
        }
        debug!(written, skipped, failed, "snapshot batch committed");

        Ok(written)
    }

    /// Vins with a snapshot on `date`.
    pub fn vins_observed_on(&self, date: NaiveDate) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT vin FROM snapshots WHERE snapshot_date = ?1")?;
        let vins = stmt
            .query_map(params![date], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(vins)
    }

    pub fn get_snapshot(&self, vin: &str, date: NaiveDate) -> Result<Option<Row>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT vin, snapshot_date, year, make, model, price, mileage, location, source_name,
                    title, details, listing_date, location_code, country_code, pending_sale,
                    current_bid, bids, distance, price_recent_change, seller_type, vehicle_title,
                    listing_type, vehicle_title_desc, img
             FROM snapshots
             WHERE vin = ?1 AND snapshot_date = ?2",
        )?;

        let row = stmt.query_row(params![vin, date], row_from_sql).optional()?;
        Ok(row)
    }

    pub fn price_history(&self, vin: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT history_date, mileage, price, trend
             FROM price_history
             WHERE vin = ?1
             ORDER BY history_date, id",
        )?;

        let entries = stmt
            .query_map(params![vin], |row| {
                Ok(HistoryEntry {
                    date: row.get(0)?,
                    mileage: row.get(1)?,
                    price: row.get(2)?,
                    trend: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    pub fn listing_history(&self, vin: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT history_date, mileage, price
             FROM listing_history
             WHERE vin = ?1
             ORDER BY history_date, id",
        )?;

        let entries = stmt
            .query_map(params![vin], |row| {
                Ok(HistoryEntry {
                    date: row.get(0)?,
                    mileage: row.get(1)?,
                    price: row.get(2)?,
                    trend: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

fn write_row(
    conn: &Connection,
    vin: &str,
    snapshot_date: NaiveDate,
    row: &Row,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO snapshots (
            vin, snapshot_date, year, make, model, price, mileage, location, source_name,
            title, details, listing_date, location_code, country_code, pending_sale,
            current_bid, bids, distance, price_recent_change, seller_type, vehicle_title,
            listing_type, vehicle_title_desc, img
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                   ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
    )?;

    stmt.execute(params![
        vin,
        snapshot_date,
        row.year,
        row.make,
        row.model,
        row.price,
        row.mileage,
        row.location,
        row.source_name,
        row.title,
        row.details,
        row.listing_date,
        row.location_code,
        row.country_code,
        row.pending_sale,
        row.current_bid,
        row.bids,
        row.distance,
        row.price_recent_change,
        row.seller_type,
        row.vehicle_title,
        row.listing_type,
        row.vehicle_title_desc,
        row.img,
    ])?;

    // history entries are never updated; sources repeat the full history on
    // every render so most of these are ignored as duplicates
    let mut price_stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO price_history (vin, history_date, mileage, price, trend)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in &row.price_history {
        let Some(date) = entry.date.as_deref() else { continue };
        price_stmt.execute(params![vin, date, entry.mileage, entry.price, entry.trend])?;
    }

    let mut listing_stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO listing_history (vin, history_date, mileage, price)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for entry in &row.listing_history {
        let Some(date) = entry.date.as_deref() else { continue };
        listing_stmt.execute(params![vin, date, entry.mileage, entry.price])?;
    }

    Ok(())
}

fn row_from_sql(row: &rusqlite::Row) -> rusqlite::Result<Row> {
    Ok(Row {
        vin: row.get(0)?,
        snapshot_date: row.get(1)?,
        year: row.get(2)?,
        make: row.get(3)?,
        model: row.get(4)?,
        price: row.get(5)?,
        mileage: row.get(6)?,
        location: row.get(7)?,
        source_name: row.get(8)?,
        title: row.get(9)?,
        details: row.get(10)?,
        listing_date: row.get(11)?,
        location_code: row.get(12)?,
        country_code: row.get(13)?,
        pending_sale: row.get(14)?,
        current_bid: row.get(15)?,
        bids: row.get(16)?,
        distance: row.get(17)?,
        price_recent_change: row.get(18)?,
        seller_type: row.get(19)?,
        vehicle_title: row.get(20)?,
        listing_type: row.get(21)?,
        vehicle_title_desc: row.get(22)?,
        img: row.get(23)?,
        price_history: Vec::new(),
        listing_history: Vec::new(),
    })
}
