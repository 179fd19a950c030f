//! Generic table manager
//!
//! Schema-driven CRUD over one registered table. Every domain table goes
//! through the same upsert/remove contract, which is what makes merge
//! application idempotent and safe to replay.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use super::connection::Store;
use super::deletion_log;
use crate::error::{Error, Result};
use crate::models::{now_ms, Record};
use crate::schema::{
    ColumnKind, TableDescriptor, COL_CREATED_AT, COL_LOCAL_ID, COL_SYNCED, COL_UPDATED_AT, COL_UUID,
};

/// Who initiated a write.
///
/// Sync-originated writes preserve the timestamps carried in the merged
/// record; stamping them fresh would make every merge look like a new edit on
/// the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    Local,
    Sync,
}

/// Schema-driven CRUD layer over one table of the record store
pub struct TableManager<'a> {
    store: &'a Store,
    descriptor: &'a TableDescriptor,
}

impl<'a> TableManager<'a> {
    pub(crate) const fn new(store: &'a Store, descriptor: &'a TableDescriptor) -> Self {
        Self { store, descriptor }
    }

    pub const fn descriptor(&self) -> &TableDescriptor {
        self.descriptor
    }

    /// Insert-or-update keyed on the conflict-resolution keys.
    ///
    /// Generates a uuid and stamps `createdAt` when absent. Local writes
    /// advance `updatedAt` to now; sync writes keep the carried timestamp.
    /// When the table declares a business-unique key and a row with that key
    /// already exists under a different uuid, that row is updated in place —
    /// its uuid and `createdAt` survive, so no duplicate logical entity is
    /// created. Returns the persisted record.
    pub fn upsert(&self, record: Record, origin: WriteOrigin) -> Result<Record> {
        let record = self.prepare_for_write(record, origin)?;
        let mut uuid = record
            .uuid()
            .ok_or_else(|| self.invalid("record is missing a usable uuid after stamping"))?;

        let conn = self.store.lock()?;

        if let Some(key) = self.descriptor.business_key() {
            if let Some(value) = record.get(key).filter(|value| !value.is_null()) {
                if let Some(existing) = self.find_uuid_by_key(&conn, key, value)? {
                    if existing != uuid {
                        uuid = existing;
                    }
                }
            }
        }

        self.write_row(&conn, &record, uuid)?;

        self.fetch_by_uuid(&conn, &uuid)?
            .ok_or_else(|| Error::NotFound(uuid.to_string()))
    }

    /// Delete by device-local row id, tombstoning the record and any cascade
    /// dependents (dependents first)
    pub fn remove(&self, local_id: i64) -> Result<()> {
        let mut conn = self.store.lock()?;
        let uuid: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT uuid FROM \"{}\" WHERE id = ?",
                    self.descriptor.name()
                ),
                [local_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = uuid else {
            return Err(Error::NotFound(format!(
                "{} id {local_id}",
                self.descriptor.name()
            )));
        };
        let uuid = raw
            .parse::<Uuid>()
            .map_err(|_| self.invalid(format!("stored uuid {raw:?} is malformed")))?;

        let tx = conn.transaction()?;
        self.delete_with_dependents(&tx, &uuid, now_ms(), false)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete by uuid, tombstoning the record and any cascade dependents
    pub fn remove_by_uuid(&self, uuid: &Uuid) -> Result<()> {
        let mut conn = self.store.lock()?;
        if self.fetch_by_uuid(&conn, uuid)?.is_none() {
            return Err(Error::NotFound(uuid.to_string()));
        }

        let tx = conn.transaction()?;
        self.delete_with_dependents(&tx, uuid, now_ms(), false)?;
        tx.commit()?;
        Ok(())
    }

    /// Sync-originated removal: applies a counterpart's deletion locally.
    ///
    /// Idempotent — a record already gone is not an error. Tombstones written
    /// here are pre-marked synced since the counterpart already holds them.
    /// Returns whether a row was actually removed.
    pub fn remove_for_sync(&self, uuid: &Uuid) -> Result<bool> {
        let mut conn = self.store.lock()?;
        if self.fetch_by_uuid(&conn, uuid)?.is_none() {
            return Ok(false);
        }

        let tx = conn.transaction()?;
        self.delete_with_dependents(&tx, uuid, now_ms(), true)?;
        tx.commit()?;
        Ok(true)
    }

    /// All rows, most recently updated first
    pub fn list(&self) -> Result<Vec<Record>> {
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM \"{}\" ORDER BY updatedAt DESC, id DESC",
            self.select_columns(),
            self.descriptor.name()
        ))?;
        let rows = stmt
            .query_map([], |row| self.row_to_record(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Lookup by uuid; unknown uuids are `None`, not an error
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Record>> {
        let conn = self.store.lock()?;
        self.fetch_by_uuid(&conn, uuid)
    }

    /// Rows whose timestamp column falls within `[start, end]` (unix ms)
    pub fn get_by_date_range(&self, column: &str, start: i64, end: i64) -> Result<Vec<Record>> {
        let is_timestamp = column == COL_CREATED_AT
            || column == COL_UPDATED_AT
            || self
                .descriptor
                .column(column)
                .is_some_and(|def| def.kind == ColumnKind::Timestamp);
        if !is_timestamp {
            return Err(self.invalid(format!("column {column:?} is not a timestamp")));
        }

        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM \"{}\" WHERE \"{column}\" BETWEEN ? AND ? ORDER BY \"{column}\" ASC",
            self.select_columns(),
            self.descriptor.name()
        ))?;
        let rows = stmt
            .query_map([start, end], |row| self.row_to_record(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.store.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", self.descriptor.name()),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Validate domain fields and stamp identity/timestamps per the contract
    fn prepare_for_write(&self, mut record: Record, origin: WriteOrigin) -> Result<Record> {
        for name in record.fields().keys() {
            match name.as_str() {
                COL_UUID | COL_CREATED_AT | COL_UPDATED_AT | COL_LOCAL_ID | COL_SYNCED => {}
                other if self.descriptor.column(other).is_none() => {
                    return Err(self.invalid(format!("unknown column {other:?}")));
                }
                _ => {}
            }
        }

        match record.get(COL_UUID) {
            None | Some(Value::Null) => record.set_uuid(Uuid::now_v7()),
            Some(_) => {
                record
                    .uuid()
                    .ok_or_else(|| self.invalid("uuid field is not a valid uuid"))?;
            }
        }

        let now = now_ms();
        let created_at = match record.get(COL_CREATED_AT) {
            None | Some(Value::Null) => {
                record.set_created_at(now);
                now
            }
            Some(_) => record
                .created_at()
                .ok_or_else(|| self.invalid("createdAt is not an integer timestamp"))?,
        };

        match origin {
            WriteOrigin::Local => record.set_updated_at(now),
            WriteOrigin::Sync => {
                if record.updated_at().is_none() {
                    record.set_updated_at(created_at);
                }
            }
        }

        if self.descriptor.tracks_synced() {
            // A sync-applied row is by definition already on the counterpart;
            // a fresh local edit is not.
            record.set(
                COL_SYNCED,
                Value::Bool(matches!(origin, WriteOrigin::Sync)),
            );
        }

        Ok(record)
    }

    fn find_uuid_by_key(
        &self,
        conn: &Connection,
        key: &str,
        value: &Value,
    ) -> Result<Option<Uuid>> {
        let column = self
            .descriptor
            .column(key)
            .ok_or_else(|| self.invalid(format!("business key {key:?} is undeclared")))?;
        let bound = self.bind_value(column.name.as_str(), column.kind, value)?;

        let existing: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT uuid FROM \"{}\" WHERE \"{key}\" = ?",
                    self.descriptor.name()
                ),
                [bound],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => Ok(None),
            Some(raw) => raw
                .parse::<Uuid>()
                .map(Some)
                .map_err(|_| self.invalid(format!("stored uuid {raw:?} is malformed"))),
        }
    }

    fn write_row(&self, conn: &Connection, record: &Record, uuid: Uuid) -> Result<()> {
        let mut columns = vec![COL_UUID, COL_CREATED_AT, COL_UPDATED_AT];
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Text(uuid.to_string()),
            SqlValue::Integer(
                record
                    .created_at()
                    .ok_or_else(|| self.invalid("createdAt missing after stamping"))?,
            ),
            SqlValue::Integer(
                record
                    .updated_at()
                    .ok_or_else(|| self.invalid("updatedAt missing after stamping"))?,
            ),
        ];

        if self.descriptor.tracks_synced() {
            let synced = record
                .get(COL_SYNCED)
                .map_or(false, |value| value.as_bool() == Some(true) || value.as_i64() == Some(1));
            columns.push(COL_SYNCED);
            values.push(SqlValue::Integer(i64::from(synced)));
        }

        for column in self.descriptor.columns() {
            columns.push(column.name.as_str());
            let value = record.get(&column.name).unwrap_or(&Value::Null);
            values.push(self.bind_value(&column.name, column.kind, value)?);
        }

        let column_list = columns
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        // createdAt is deliberately absent from the conflict update: it is
        // set once and never overwritten.
        let updates = columns
            .iter()
            .filter(|name| **name != COL_UUID && **name != COL_CREATED_AT)
            .map(|name| format!("\"{name}\" = excluded.\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ");

        conn.execute(
            &format!(
                "INSERT INTO \"{}\" ({column_list}) VALUES ({placeholders})
                 ON CONFLICT(uuid) DO UPDATE SET {updates}",
                self.descriptor.name()
            ),
            params_from_iter(values),
        )?;
        Ok(())
    }

    fn delete_with_dependents(
        &self,
        conn: &Connection,
        uuid: &Uuid,
        deleted_at: i64,
        synced: bool,
    ) -> Result<()> {
        for dependent in self.descriptor.dependents() {
            let mut stmt = conn.prepare(&format!(
                "SELECT uuid FROM \"{}\" WHERE \"{}\" = ?",
                dependent.table, dependent.parent_column
            ))?;
            let children = stmt
                .query_map([uuid.to_string()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for raw in children {
                let child = raw
                    .parse::<Uuid>()
                    .map_err(|_| self.invalid(format!("stored uuid {raw:?} is malformed")))?;
                conn.execute(
                    &format!("DELETE FROM \"{}\" WHERE uuid = ?", dependent.table),
                    [child.to_string()],
                )?;
                deletion_log::append(conn, &dependent.table, &child, deleted_at, synced)?;
            }
        }

        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE uuid = ?", self.descriptor.name()),
            [uuid.to_string()],
        )?;
        deletion_log::append(conn, self.descriptor.name(), uuid, deleted_at, synced)?;

        tracing::debug!(
            table = self.descriptor.name(),
            uuid = %uuid,
            "Removed record and appended tombstone"
        );
        Ok(())
    }

    fn fetch_by_uuid(&self, conn: &Connection, uuid: &Uuid) -> Result<Option<Record>> {
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM \"{}\" WHERE uuid = ?",
                    self.select_columns(),
                    self.descriptor.name()
                ),
                [uuid.to_string()],
                |row| self.row_to_record(row),
            )
            .optional()?;
        Ok(record)
    }

    fn select_columns(&self) -> String {
        let mut columns = vec![
            COL_LOCAL_ID.to_string(),
            COL_UUID.to_string(),
            COL_CREATED_AT.to_string(),
            COL_UPDATED_AT.to_string(),
        ];
        if self.descriptor.tracks_synced() {
            columns.push(COL_SYNCED.to_string());
        }
        for column in self.descriptor.columns() {
            columns.push(format!("\"{}\"", column.name));
        }
        columns.join(", ")
    }

    fn row_to_record(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let mut record = Record::new();
        record.set(COL_LOCAL_ID, Value::from(row.get::<_, i64>(0)?));
        record.set(COL_UUID, Value::String(row.get::<_, String>(1)?));
        record.set(COL_CREATED_AT, Value::from(row.get::<_, i64>(2)?));
        record.set(COL_UPDATED_AT, Value::from(row.get::<_, i64>(3)?));

        let mut index = 4;
        if self.descriptor.tracks_synced() {
            record.set(COL_SYNCED, Value::Bool(row.get::<_, i64>(index)? != 0));
            index += 1;
        }

        for column in self.descriptor.columns() {
            let value = match column.kind {
                ColumnKind::Integer | ColumnKind::Timestamp => row
                    .get::<_, Option<i64>>(index)?
                    .map_or(Value::Null, Value::from),
                ColumnKind::Boolean => row
                    .get::<_, Option<i64>>(index)?
                    .map_or(Value::Null, |flag| Value::Bool(flag != 0)),
                ColumnKind::Real => row
                    .get::<_, Option<f64>>(index)?
                    .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
                    .unwrap_or(Value::Null),
                ColumnKind::Text => row
                    .get::<_, Option<String>>(index)?
                    .map_or(Value::Null, Value::String),
            };
            record.set(column.name.clone(), value);
            index += 1;
        }

        Ok(record)
    }

    fn bind_value(&self, name: &str, kind: ColumnKind, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let bound = match kind {
            ColumnKind::Integer | ColumnKind::Timestamp => {
                value.as_i64().map(SqlValue::Integer)
            }
            ColumnKind::Boolean => value
                .as_bool()
                .map(|flag| SqlValue::Integer(i64::from(flag)))
                .or_else(|| value.as_i64().map(|flag| SqlValue::Integer(i64::from(flag != 0)))),
            ColumnKind::Real => value.as_f64().map(SqlValue::Real),
            ColumnKind::Text => value.as_str().map(|text| SqlValue::Text(text.to_string())),
        };
        bound.ok_or_else(|| {
            self.invalid(format!(
                "column {name:?} expects {kind:?}, got {value}"
            ))
        })
    }

    fn invalid(&self, detail: impl std::fmt::Display) -> Error {
        Error::InvalidRecord(format!("{}: {detail}", self.descriptor.name()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::tables::standard_registry;

    fn setup() -> Store {
        Store::open_in_memory(Arc::new(standard_registry())).unwrap()
    }

    #[test]
    fn upsert_generates_uuid_and_round_trips() {
        let store = setup();
        let notes = store.table("notes").unwrap();

        let saved = notes
            .upsert(
                Record::new().with("content", json!("remember the milk")),
                WriteOrigin::Local,
            )
            .unwrap();

        let uuid = saved.uuid().expect("uuid generated");
        assert!(saved.created_at().unwrap() > 0);
        assert_eq!(saved.created_at(), saved.updated_at());

        let fetched = notes.get_by_uuid(&uuid).unwrap().unwrap();
        assert_eq!(fetched.get("content"), Some(&json!("remember the milk")));
    }

    #[test]
    fn local_rewrite_advances_updated_at_but_not_created_at() {
        let store = setup();
        let notes = store.table("notes").unwrap();

        let mut saved = notes
            .upsert(
                Record::new().with("content", json!("v1")),
                WriteOrigin::Local,
            )
            .unwrap();
        let created = saved.created_at().unwrap();

        // Force a visibly older clock, then rewrite locally
        saved.set_updated_at(created - 10_000);
        saved.set("content", json!("v2"));
        let rewritten = notes.upsert(saved.portable(), WriteOrigin::Local).unwrap();

        assert_eq!(rewritten.created_at(), Some(created));
        assert!(rewritten.updated_at().unwrap() >= created);
        assert_eq!(rewritten.get("content"), Some(&json!("v2")));
    }

    #[test]
    fn sync_write_preserves_carried_timestamps() {
        let store = setup();
        let tasks = store.table("tasks").unwrap();

        let record = Record::new()
            .with("uuid", json!(Uuid::now_v7().to_string()))
            .with("createdAt", json!(1_000))
            .with("updatedAt", json!(2_000))
            .with("title", json!("water plants"))
            .with("completed", json!(false));

        let saved = tasks.upsert(record, WriteOrigin::Sync).unwrap();
        assert_eq!(saved.created_at(), Some(1_000));
        assert_eq!(saved.updated_at(), Some(2_000));
        // Sync-applied rows carry the synced marker on tables that track it
        assert_eq!(saved.get("synced"), Some(&json!(true)));
    }

    #[test]
    fn upsert_is_idempotent_under_replay() {
        let store = setup();
        let tasks = store.table("tasks").unwrap();

        let record = Record::new()
            .with("uuid", json!(Uuid::now_v7().to_string()))
            .with("createdAt", json!(1_000))
            .with("updatedAt", json!(2_000))
            .with("title", json!("same row"));

        tasks.upsert(record.clone(), WriteOrigin::Sync).unwrap();
        tasks.upsert(record.clone(), WriteOrigin::Sync).unwrap();
        tasks.upsert(record, WriteOrigin::Sync).unwrap();

        assert_eq!(tasks.count().unwrap(), 1);
    }

    #[test]
    fn business_key_updates_existing_row_in_place() {
        let store = setup();
        let settings = store.table("settings").unwrap();

        let original = settings
            .upsert(
                Record::new()
                    .with("name", json!("theme"))
                    .with("value", json!("dark")),
                WriteOrigin::Local,
            )
            .unwrap();

        // Same logical setting arriving under a different uuid
        let incoming = Record::new()
            .with("uuid", json!(Uuid::now_v7().to_string()))
            .with("name", json!("theme"))
            .with("value", json!("light"));
        let merged = settings.upsert(incoming, WriteOrigin::Local).unwrap();

        assert_eq!(merged.uuid(), original.uuid());
        assert_eq!(merged.created_at(), original.created_at());
        assert_eq!(merged.get("value"), Some(&json!("light")));
        assert_eq!(settings.count().unwrap(), 1);
    }

    #[test]
    fn remove_tombstones_each_distinct_record_once() {
        let store = setup();
        let notes = store.table("notes").unwrap();

        let mut uuids = Vec::new();
        for i in 0..3 {
            let saved = notes
                .upsert(
                    Record::new().with("content", json!(format!("note {i}"))),
                    WriteOrigin::Local,
                )
                .unwrap();
            uuids.push(saved.uuid().unwrap());
        }

        for uuid in &uuids {
            notes.remove_by_uuid(uuid).unwrap();
        }

        let tombstones = store.deletion_log().list_unsynced().unwrap();
        assert_eq!(tombstones.len(), 3);
        let mut seen: Vec<Uuid> = tombstones.iter().map(|entry| entry.record_uuid).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn remove_cascades_to_dependents_with_tombstones() {
        let store = setup();
        let habits = store.table("habits").unwrap();
        let entries = store.table("habit_entries").unwrap();

        let habit = habits
            .upsert(
                Record::new().with("name", json!("stretch")),
                WriteOrigin::Local,
            )
            .unwrap();
        let habit_uuid = habit.uuid().unwrap();

        for day in 0..2 {
            entries
                .upsert(
                    Record::new()
                        .with("habitUuid", json!(habit_uuid.to_string()))
                        .with("entryDate", json!(day * 86_400_000))
                        .with("completed", json!(true)),
                    WriteOrigin::Local,
                )
                .unwrap();
        }

        habits.remove_by_uuid(&habit_uuid).unwrap();

        assert_eq!(entries.count().unwrap(), 0);
        let tombstones = store.deletion_log().list_unsynced().unwrap();
        assert_eq!(tombstones.len(), 3);
        assert_eq!(
            tombstones
                .iter()
                .filter(|entry| entry.table_name == "habit_entries")
                .count(),
            2
        );
    }

    #[test]
    fn remove_unknown_uuid_is_not_found() {
        let store = setup();
        let notes = store.table("notes").unwrap();
        let error = notes.remove_by_uuid(&Uuid::now_v7()).unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[test]
    fn remove_for_sync_is_idempotent() {
        let store = setup();
        let notes = store.table("notes").unwrap();

        let saved = notes
            .upsert(Record::new().with("content", json!("bye")), WriteOrigin::Local)
            .unwrap();
        let uuid = saved.uuid().unwrap();

        assert!(notes.remove_for_sync(&uuid).unwrap());
        assert!(!notes.remove_for_sync(&uuid).unwrap());

        let tombstone = store.deletion_log().get("notes", &uuid).unwrap().unwrap();
        assert!(tombstone.synced);
    }

    #[test]
    fn get_by_uuid_returns_none_for_unknown() {
        let store = setup();
        let notes = store.table("notes").unwrap();
        assert!(notes.get_by_uuid(&Uuid::now_v7()).unwrap().is_none());
    }

    #[test]
    fn get_by_date_range_filters_on_timestamp_columns() {
        let store = setup();
        let transactions = store.table("transactions").unwrap();

        for (amount, at) in [(5.0, 1_000), (7.5, 2_000), (9.0, 3_000)] {
            transactions
                .upsert(
                    Record::new()
                        .with("amount", json!(amount))
                        .with("category", json!("coffee"))
                        .with("occurredAt", json!(at)),
                    WriteOrigin::Local,
                )
                .unwrap();
        }

        let window = transactions
            .get_by_date_range("occurredAt", 1_500, 2_500)
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].get("amount"), Some(&json!(7.5)));

        let error = transactions
            .get_by_date_range("category", 0, 10)
            .unwrap_err();
        assert!(matches!(error, Error::InvalidRecord(_)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let store = setup();
        let notes = store.table("notes").unwrap();
        let error = notes
            .upsert(
                Record::new().with("colour", json!("red")),
                WriteOrigin::Local,
            )
            .unwrap_err();
        assert!(matches!(error, Error::InvalidRecord(_)));
    }
}
