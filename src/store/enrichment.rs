use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{RecordStore, StoreError};
use crate::enrich::fields::{ComplaintSummary, EnrichmentFields, RecallSummary, SafetySummary};
use crate::vin;

impl RecordStore {
    /// Vins with at least one snapshot and no enrichment record, sorted.
    /// Placeholder vins are never part of the backlog.
    pub fn backlog_vins(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT s.vin
             FROM snapshots s
             LEFT JOIN enrichment e ON e.vin = s.vin
             WHERE e.vin IS NULL
             ORDER BY s.vin",
        )?;

        let vins = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter(|v| v.as_ref().map_or(true, |v| vin::is_valid(v)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(vins)
    }

    pub fn upsert_enrichment(&self, vin: &str, fields: &EnrichmentFields) -> Result<(), StoreError> {
        let mut batch = BTreeMap::new();
        batch.insert(vin.to_string(), fields.clone());
        self.upsert_enrichment_batch(&batch)?;
        Ok(())
    }

    /// Replace-insert one enrichment record per vin in a single transaction.
    ///
    /// An empty record still marks the vin as enriched. Placeholder vins are
    /// refused with a warning. Returns the number of records written.
    pub fn upsert_enrichment_batch(
        &self,
        records: &BTreeMap<String, EnrichmentFields>,
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let enriched_at = chrono::Utc::now().to_rfc3339();
        let mut conn = self.lock();
        let mut tx = conn.transaction()?;
        let mut written = 0usize;

        for (vin, fields) in records {
            if !vin::is_valid(vin) {
                warn!(vin, "refusing enrichment record for placeholder vin");
                continue;
            }

            let sp = tx.savepoint()?;
            match write_enrichment(&sp, vin, fields, &enriched_at) {
                Ok(()) => {
                    sp.commit()?;
                    written += 1;
                }
                Err(e) => {
                    warn!(vin, error = %e, "failed to persist enrichment record, skipping");
                }
            }
        }

        tx.commit()?;
        debug!(written, requested = records.len(), "enrichment batch committed");

        Ok(written)
    }

    pub fn get_enrichment(&self, vin: &str) -> Result<Option<EnrichmentFields>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT make, model, model_year, trim, series, body_class, vehicle_type, drive_type,
                    fuel_type_primary, engine_cylinders, displacement_l, engine_hp,
                    transmission_style, transmission_speeds, doors, manufacturer, plant_country,
                    error_code,
                    safety_ratings_count, overall_rating, front_crash_rating, side_crash_rating,
                    rollover_rating,
                    total_recalls, recall_components, latest_recall_date,
                    total_complaints, complaint_injuries, complaint_deaths,
                    complaint_crash_related, complaint_fire_related, common_complaint_areas,
                    extra
             FROM enrichment
             WHERE vin = ?1",
        )?;

        let found = stmt
            .query_row(params![vin], |row| {
                let fields = fields_from_row(row)?;
                let extra: Option<String> = row.get(32)?;
                Ok((fields, extra))
            })
            .optional()?;

        let Some((mut fields, extra)) = found else {
            return Ok(None);
        };

        if let Some(extra) = extra {
            fields.extra = serde_json::from_str(&extra)?;
        }

        Ok(Some(fields))
    }
}

fn write_enrichment(
    conn: &Connection,
    vin: &str,
    f: &EnrichmentFields,
    enriched_at: &str,
) -> Result<(), StoreError> {
    let extra = if f.extra.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&f.extra)?)
    };

    let safety = f.safety.as_ref();
    let recalls = f.recalls.as_ref();
    let complaints = f.complaints.as_ref();

    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO enrichment (
            vin, make, model, model_year, trim, series, body_class, vehicle_type, drive_type,
            fuel_type_primary, engine_cylinders, displacement_l, engine_hp, transmission_style,
            transmission_speeds, doors, manufacturer, plant_country, error_code,
            safety_ratings_count, overall_rating, front_crash_rating, side_crash_rating,
            rollover_rating,
            total_recalls, recall_components, latest_recall_date,
            total_complaints, complaint_injuries, complaint_deaths, complaint_crash_related,
            complaint_fire_related, common_complaint_areas,
            extra, enriched_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                   ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32,
                   ?33, ?34, ?35)",
    )?;

    stmt.execute(params![
        vin,
        f.make,
        f.model,
        f.model_year,
        f.trim,
        f.series,
        f.body_class,
        f.vehicle_type,
        f.drive_type,
        f.fuel_type_primary,
        f.engine_cylinders,
        f.displacement_l,
        f.engine_hp,
        f.transmission_style,
        f.transmission_speeds,
        f.doors,
        f.manufacturer,
        f.plant_country,
        f.error_code,
        safety.map(|s| s.ratings_count),
        safety.and_then(|s| s.overall_rating.as_deref()),
        safety.and_then(|s| s.front_crash_rating.as_deref()),
        safety.and_then(|s| s.side_crash_rating.as_deref()),
        safety.and_then(|s| s.rollover_rating.as_deref()),
        recalls.map(|r| r.total_recalls),
        recalls.and_then(|r| r.recall_components.as_deref()),
        recalls.and_then(|r| r.latest_recall_date),
        complaints.map(|c| c.total_complaints),
        complaints.map(|c| c.injuries),
        complaints.map(|c| c.deaths),
        complaints.map(|c| c.crash_related),
        complaints.map(|c| c.fire_related),
        complaints.and_then(|c| c.common_areas.as_deref()),
        extra,
        enriched_at,
    ])?;

    Ok(())
}

fn fields_from_row(row: &rusqlite::Row) -> rusqlite::Result<EnrichmentFields> {
    let safety = match row.get::<_, Option<u32>>(18)? {
        Some(ratings_count) => Some(SafetySummary {
            ratings_count,
            overall_rating: row.get(19)?,
            front_crash_rating: row.get(20)?,
            side_crash_rating: row.get(21)?,
            rollover_rating: row.get(22)?,
        }),
        None => None,
    };

    let recalls = match row.get::<_, Option<u32>>(23)? {
        Some(total_recalls) => Some(RecallSummary {
            total_recalls,
            recall_components: row.get(24)?,
            latest_recall_date: row.get(25)?,
        }),
        None => None,
    };

    let complaints = match row.get::<_, Option<u32>>(26)? {
        Some(total_complaints) => Some(ComplaintSummary {
            total_complaints,
            injuries: row.get::<_, Option<u32>>(27)?.unwrap_or(0),
            deaths: row.get::<_, Option<u32>>(28)?.unwrap_or(0),
            crash_related: row.get::<_, Option<u32>>(29)?.unwrap_or(0),
            fire_related: row.get::<_, Option<u32>>(30)?.unwrap_or(0),
            common_areas: row.get(31)?,
        }),
        None => None,
    };

    Ok(EnrichmentFields {
        make: row.get(0)?,
        model: row.get(1)?,
        model_year: row.get(2)?,
        trim: row.get(3)?,
        series: row.get(4)?,
        body_class: row.get(5)?,
        vehicle_type: row.get(6)?,
        drive_type: row.get(7)?,
        fuel_type_primary: row.get(8)?,
        engine_cylinders: row.get(9)?,
        displacement_l: row.get(10)?,
        engine_hp: row.get(11)?,
        transmission_style: row.get(12)?,
        transmission_speeds: row.get(13)?,
        doors: row.get(14)?,
        manufacturer: row.get(15)?,
        plant_country: row.get(16)?,
        error_code: row.get(17)?,
        safety,
        recalls,
        complaints,
        extra: BTreeMap::new(),
    })
}
