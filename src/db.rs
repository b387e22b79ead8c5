use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::flatten::FlattenedRecord;
use crate::temporal::deserialize_timestamp;

/// Text that stands for NULL in a bulk-load file
pub const NULL_MARKER: &str = "\\N";

/// Property definition: a named attribute owned by one project
/// CSV header: `id,project_id,label`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: i64,
    pub project_id: i64,
    pub label: String,
}

impl Property {
    pub fn new(id: i64, project_id: i64, label: &str) -> Self {
        Property {
            id,
            project_id,
            label: label.to_string(),
        }
    }
}

/// One observed value of a property for a customer
/// CSV header: `id,customer_id,property_id,value,create_dte`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub id: i64,
    pub customer_id: i64,
    pub property_id: i64,

    /// `None` when the source held the NULL marker
    #[serde(deserialize_with = "deserialize_nullable")]
    pub value: Option<String>,

    #[serde(rename = "create_dte", deserialize_with = "deserialize_timestamp")]
    pub created_at: NaiveDateTime,
}

impl PropertyValue {
    pub fn new(
        id: i64,
        customer_id: i64,
        property_id: i64,
        value: Option<&str>,
        created_at: NaiveDateTime,
    ) -> Self {
        PropertyValue {
            id,
            customer_id,
            property_id,
            value: value.map(str::to_string),
            created_at,
        }
    }

    /// Compute idempotency hash so re-loading a file inserts nothing new
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}",
            self.id,
            self.customer_id,
            self.property_id,
            self.value.as_deref().unwrap_or(NULL_MARKER),
            self.created_at
        ));
        format!("{:x}", hasher.finalize())
    }
}

fn deserialize_nullable<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    if text == NULL_MARKER {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

/// One bulk load of a CSV file into a table, kept in `load_history`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoadEvent {
    pub event_id: String,
    pub table: String,

    /// File the rows were read from
    pub source: String,
    pub delimiter: char,
    pub inserted: usize,
    pub duplicates: usize,
    pub loaded_at: DateTime<Utc>,
}

impl LoadEvent {
    pub fn new(table: &str, source: &Path, delimiter: u8, stats: InsertStats) -> Self {
        LoadEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            table: table.to_string(),
            source: source.display().to_string(),
            delimiter: char::from(delimiter),
            inserted: stats.inserted,
            duplicates: stats.duplicates,
            loaded_at: Utc::now(),
        }
    }
}

/// Outcome of one bulk insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertStats {
    pub inserted: usize,
    pub duplicates: usize,
}

pub fn setup_database(conn: &Connection, reset: bool) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    if reset {
        conn.execute_batch(
            "DROP TABLE IF EXISTS projects_for_marketing;
             DROP TABLE IF EXISTS project_properties;
             DROP TABLE IF EXISTS project_properties_values;",
        )
        .context("Failed to drop existing tables")?;
        info!("Dropped existing tables");
    }

    // ==========================================================================
    // Property catalog
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_properties (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL,
            label TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Property value log (append-only, deduplicated by hash)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_properties_values (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            id INTEGER NOT NULL,
            customer_id INTEGER NOT NULL,
            property_id INTEGER NOT NULL,
            value TEXT,
            create_dte TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Materialized marketing view
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects_for_marketing (
            project_id INTEGER NOT NULL,
            customer_id INTEGER NOT NULL,
            customer_email TEXT,
            avg_message_volume TEXT,
            estimated_client_volume_usd TEXT,
            plan TEXT,
            interested_in_product TEXT,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (project_id, customer_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Load history (survives a reset)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS load_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            table_name TEXT NOT NULL,
            source TEXT NOT NULL,
            delimiter TEXT NOT NULL,
            inserted INTEGER NOT NULL,
            duplicates INTEGER NOT NULL,
            loaded_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_values_property ON project_properties_values(property_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_values_customer ON project_properties_values(customer_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_load_history_table ON load_history(table_name)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// CSV LOADING
// ============================================================================

fn read_csv<T: DeserializeOwned>(path: &Path, delimiter: u8, what: &str) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .with_context(|| format!("Failed to open {} file: {}", what, path.display()))?;

    let mut rows = Vec::new();

    for (line_num, result) in rdr.deserialize().enumerate() {
        let row: T = result.with_context(|| {
            // +2 because: 1-indexed + header row
            format!("Failed to parse {} line {} in {}", what, line_num + 2, path.display())
        })?;
        rows.push(row);
    }

    debug!("Read {} {} rows from {}", rows.len(), what, path.display());
    Ok(rows)
}

pub fn load_properties_csv(path: &Path, delimiter: u8) -> Result<Vec<Property>> {
    read_csv(path, delimiter, "property")
}

pub fn load_property_values_csv(path: &Path, delimiter: u8) -> Result<Vec<PropertyValue>> {
    read_csv(path, delimiter, "property value")
}

// ============================================================================
// BULK INSERT
// ============================================================================

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Insert property definitions; an id that already exists is skipped
pub fn insert_properties(conn: &Connection, properties: &[Property]) -> Result<InsertStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = InsertStats::default();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO project_properties (id, project_id, label) VALUES (?1, ?2, ?3)",
        )?;

        for property in properties {
            match stmt.execute(params![property.id, property.project_id, property.label]) {
                Ok(_) => stats.inserted += 1,
                Err(e) if is_constraint_violation(&e) => {
                    debug!("Skipping duplicate property id {}", property.id);
                    stats.duplicates += 1;
                }
                Err(e) => return Err(e).context("Failed to insert property"),
            }
        }
    }

    tx.commit()?;

    info!(
        "Inserted {} properties ({} duplicates skipped)",
        stats.inserted, stats.duplicates
    );
    Ok(stats)
}

/// Insert property values; rows already loaded (same hash) are skipped
pub fn insert_property_values(conn: &Connection, values: &[PropertyValue]) -> Result<InsertStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = InsertStats::default();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO project_properties_values (
                idempotency_hash, id, customer_id, property_id, value, create_dte
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for value in values {
            let hash = value.compute_idempotency_hash();
            let result = stmt.execute(params![
                hash,
                value.id,
                value.customer_id,
                value.property_id,
                value.value,
                value.created_at,
            ]);

            match result {
                Ok(_) => stats.inserted += 1,
                Err(e) if is_constraint_violation(&e) => stats.duplicates += 1,
                Err(e) => return Err(e).context("Failed to insert property value"),
            }
        }
    }

    tx.commit()?;

    info!(
        "Inserted {} property values ({} duplicates skipped)",
        stats.inserted, stats.duplicates
    );
    Ok(stats)
}

/// Append one load to `load_history`
pub fn record_load(conn: &Connection, event: &LoadEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO load_history (
            event_id, table_name, source, delimiter, inserted, duplicates, loaded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.table,
            event.source,
            event.delimiter.to_string(),
            event.inserted as i64,
            event.duplicates as i64,
            event.loaded_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to record load of {}", event.source))?;

    Ok(())
}

/// Loads into `table`, newest first
pub fn get_load_history(conn: &Connection, table: &str) -> Result<Vec<LoadEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, table_name, source, delimiter, inserted, duplicates, loaded_at
         FROM load_history
         WHERE table_name = ?1
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![table], |row| {
            let delimiter: String = row.get(3)?;
            let inserted: i64 = row.get(4)?;
            let duplicates: i64 = row.get(5)?;
            let loaded_at: String = row.get(6)?;

            Ok(LoadEvent {
                event_id: row.get(0)?,
                table: row.get(1)?,
                source: row.get(2)?,
                delimiter: delimiter.chars().next().unwrap_or(','),
                inserted: inserted as usize,
                duplicates: duplicates as usize,
                loaded_at: DateTime::parse_from_rfc3339(&loaded_at)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Read both CSV files, insert them and record each load
pub fn import_csv_files(
    conn: &Connection,
    properties_csv: &Path,
    values_csv: &Path,
    delimiter: u8,
) -> Result<(InsertStats, InsertStats)> {
    let properties = load_properties_csv(properties_csv, delimiter)?;
    let values = load_property_values_csv(values_csv, delimiter)?;

    let property_stats = insert_properties(conn, &properties)?;
    record_load(
        conn,
        &LoadEvent::new("project_properties", properties_csv, delimiter, property_stats),
    )?;

    let value_stats = insert_property_values(conn, &values)?;
    record_load(
        conn,
        &LoadEvent::new("project_properties_values", values_csv, delimiter, value_stats),
    )?;

    Ok((property_stats, value_stats))
}

// ============================================================================
// READ BACK
// ============================================================================

pub fn get_all_properties(conn: &Connection) -> Result<Vec<Property>> {
    let mut stmt = conn.prepare("SELECT id, project_id, label FROM project_properties ORDER BY id")?;

    let properties = stmt
        .query_map([], |row| {
            Ok(Property {
                id: row.get(0)?,
                project_id: row.get(1)?,
                label: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(properties)
}

/// All property values in load order
pub fn get_all_property_values(conn: &Connection) -> Result<Vec<PropertyValue>> {
    let mut stmt = conn.prepare(
        "SELECT id, customer_id, property_id, value, create_dte
         FROM project_properties_values
         ORDER BY row_id",
    )?;

    let values = stmt
        .query_map([], |row| {
            Ok(PropertyValue {
                id: row.get(0)?,
                customer_id: row.get(1)?,
                property_id: row.get(2)?,
                value: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(values)
}

pub fn count_properties(conn: &Connection) -> Result<i64> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM project_properties", [], |row| row.get(0))?;

    Ok(count)
}

pub fn count_property_values(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM project_properties_values",
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// MARKETING VIEW
// ============================================================================

/// Replace the contents of `projects_for_marketing` with a fresh result
pub fn replace_marketing_projects(conn: &Connection, records: &[FlattenedRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let computed_at = Utc::now().to_rfc3339();

    tx.execute("DELETE FROM projects_for_marketing", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO projects_for_marketing (
                project_id, customer_id, customer_email, avg_message_volume,
                estimated_client_volume_usd, plan, interested_in_product, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;

        for record in records {
            stmt.execute(params![
                record.project_id,
                record.customer_id,
                record.customer_email,
                record.avg_message_volume.map(|d| d.to_string()),
                record.estimated_client_volume_usd.map(|d| d.to_string()),
                record.plan,
                record.interested_in_product,
                computed_at,
            ])
            .context("Failed to insert marketing project")?;
        }
    }

    tx.commit()?;
    info!("Stored {} rows in projects_for_marketing", records.len());

    Ok(records.len())
}

fn decimal_column(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Decimal::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub fn get_marketing_projects(conn: &Connection) -> Result<Vec<FlattenedRecord>> {
    let mut stmt = conn.prepare(
        "SELECT project_id, customer_id, customer_email, avg_message_volume,
                estimated_client_volume_usd, plan, interested_in_product
         FROM projects_for_marketing
         ORDER BY project_id, customer_id",
    )?;

    let records = stmt
        .query_map([], |row| {
            Ok(FlattenedRecord {
                project_id: row.get(0)?,
                customer_id: row.get(1)?,
                customer_email: row.get(2)?,
                avg_message_volume: decimal_column(row, 3)?,
                estimated_client_volume_usd: decimal_column(row, 4)?,
                plan: row.get(5)?,
                interested_in_product: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}
