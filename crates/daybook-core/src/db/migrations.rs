//! Database migrations
//!
//! Version 1 lays down the deletion log and version tracking. Domain tables
//! are created from the registry on every open, so registering a new
//! descriptor is enough to grow the schema.

use rusqlite::Connection;

use crate::error::Result;
use crate::schema::{SchemaRegistry, TableDescriptor};

/// Current fixed-schema version (deletion log + version tracking)
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations and materialize registered tables
pub fn run(conn: &Connection, registry: &SchemaRegistry) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    for descriptor in registry.iter() {
        conn.execute_batch(&create_table_sql(descriptor))?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: version tracking and the tombstone ledger
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY
         );
         CREATE TABLE IF NOT EXISTS deletion_log (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             tableName TEXT NOT NULL,
             recordUuid TEXT NOT NULL,
             deletedAt INTEGER NOT NULL,
             synced INTEGER NOT NULL DEFAULT 0,
             UNIQUE (tableName, recordUuid)
         );
         CREATE INDEX IF NOT EXISTS idx_deletion_log_pending
             ON deletion_log(synced, deletedAt ASC);
         INSERT INTO schema_version (version) VALUES (1);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

/// Render the CREATE statements for one registered table
fn create_table_sql(descriptor: &TableDescriptor) -> String {
    let name = descriptor.name();
    let mut columns = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "uuid TEXT NOT NULL UNIQUE".to_string(),
        "createdAt INTEGER NOT NULL".to_string(),
        "updatedAt INTEGER NOT NULL".to_string(),
    ];
    if descriptor.tracks_synced() {
        columns.push("synced INTEGER NOT NULL DEFAULT 0".to_string());
    }
    for column in descriptor.columns() {
        columns.push(format!("\"{}\" {}", column.name, column.kind.sql_type()));
    }

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS \"{name}\" (\n    {}\n);\n",
        columns.join(",\n    ")
    );
    sql.push_str(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{name}_updated ON \"{name}\"(updatedAt DESC);\n"
    ));
    if let Some(key) = descriptor.business_key() {
        sql.push_str(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_{name}_{key} ON \"{name}\"(\"{key}\");\n"
        ));
    }
    sql
}
