use rusqlite::Connection;
use tracing::info;

/// Listing columns beyond the `(vin, snapshot_date)` key. Databases created
/// by older versions are brought up to this set on open.
pub const SNAPSHOT_COLUMNS: &[(&str, &str)] = &[
    ("year", "INTEGER"),
    ("make", "TEXT"),
    ("model", "TEXT"),
    ("price", "REAL"),
    ("mileage", "INTEGER"),
    ("location", "TEXT"),
    ("source_name", "TEXT"),
    ("title", "TEXT"),
    ("details", "TEXT"),
    ("listing_date", "TEXT"),
    ("location_code", "TEXT"),
    ("country_code", "TEXT"),
    ("pending_sale", "BOOLEAN"),
    ("current_bid", "REAL"),
    ("bids", "INTEGER"),
    ("distance", "REAL"),
    ("price_recent_change", "BOOLEAN"),
    ("seller_type", "TEXT"),
    ("vehicle_title", "TEXT"),
    ("listing_type", "TEXT"),
    ("vehicle_title_desc", "TEXT"),
    ("img", "TEXT"),
];

pub const ENRICHMENT_COLUMNS: &[(&str, &str)] = &[
    ("make", "TEXT"),
    ("model", "TEXT"),
    ("model_year", "TEXT"),
    ("trim", "TEXT"),
    ("series", "TEXT"),
    ("body_class", "TEXT"),
    ("vehicle_type", "TEXT"),
    ("drive_type", "TEXT"),
    ("fuel_type_primary", "TEXT"),
    ("engine_cylinders", "TEXT"),
    ("displacement_l", "TEXT"),
    ("engine_hp", "TEXT"),
    ("transmission_style", "TEXT"),
    ("transmission_speeds", "TEXT"),
    ("doors", "TEXT"),
    ("manufacturer", "TEXT"),
    ("plant_country", "TEXT"),
    ("error_code", "TEXT"),
    ("safety_ratings_count", "INTEGER"),
    ("overall_rating", "TEXT"),
    ("front_crash_rating", "TEXT"),
    ("side_crash_rating", "TEXT"),
    ("rollover_rating", "TEXT"),
    ("total_recalls", "INTEGER"),
    ("recall_components", "TEXT"),
    ("latest_recall_date", "TEXT"),
    ("total_complaints", "INTEGER"),
    ("complaint_injuries", "INTEGER"),
    ("complaint_deaths", "INTEGER"),
    ("complaint_crash_related", "INTEGER"),
    ("complaint_fire_related", "INTEGER"),
    ("common_complaint_areas", "TEXT"),
    ("extra", "TEXT"),
    ("enriched_at", "TEXT"),
];

pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            vin TEXT NOT NULL,
            snapshot_date TEXT NOT NULL,
            PRIMARY KEY (vin, snapshot_date)
        )",
        [],
    )?;
    ensure_columns(conn, "snapshots", SNAPSHOT_COLUMNS)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS price_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vin TEXT NOT NULL,
            history_date TEXT NOT NULL,
            mileage INTEGER,
            price REAL,
            trend TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS listing_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vin TEXT NOT NULL,
            history_date TEXT NOT NULL,
            mileage INTEGER,
            price REAL
        )",
        [],
    )?;

    // sqlite treats NULLs as distinct in unique constraints, so the
    // history keys coalesce them; otherwise priceless entries would repeat
    // on every pass
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_price_history_key
         ON price_history(vin, history_date, IFNULL(price, -1))",
        [],
    )?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_listing_history_key
         ON listing_history(vin, history_date, IFNULL(price, -1), IFNULL(mileage, -1))",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrichment (
            vin TEXT PRIMARY KEY
        )",
        [],
    )?;
    ensure_columns(conn, "enrichment", ENRICHMENT_COLUMNS)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_date ON snapshots(snapshot_date)",
        [],
    )?;

    Ok(())
}

pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Add any of `columns` missing from `table`. Returns the names added.
fn ensure_columns(
    conn: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> rusqlite::Result<Vec<String>> {
    let existing = table_columns(conn, table)?;
    let mut added = Vec::new();

    for (name, sql_type) in columns {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {name} {sql_type}"), [])?;
        added.push((*name).to_string());
    }

    if !added.is_empty() {
        info!(table, columns = ?added, "added missing columns");
    }

    Ok(added)
}
