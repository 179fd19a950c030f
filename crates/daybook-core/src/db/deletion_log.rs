//! Deletion log — the append-only tombstone ledger
//!
//! Appends happen only on the table manager's delete path. The log never
//! blocks a delete; it records history so deletions can be propagated and so
//! the merge engine can order deletes against edits.

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::connection::Store;
use crate::error::Result;
use crate::models::DeletionLogEntry;

/// Handle over the device's tombstone ledger
pub struct DeletionLog<'a> {
    store: &'a Store,
}

impl<'a> DeletionLog<'a> {
    pub(crate) const fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Tombstones not yet propagated, in causal creation order
    pub fn list_unsynced(&self) -> Result<Vec<DeletionLogEntry>> {
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, tableName, recordUuid, deletedAt, synced
             FROM deletion_log
             WHERE synced = 0
             ORDER BY deletedAt ASC, id ASC",
        )?;
        let entries = stmt
            .query_map([], parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Every tombstone on this device, in causal creation order
    pub fn list_all(&self) -> Result<Vec<DeletionLogEntry>> {
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, tableName, recordUuid, deletedAt, synced
             FROM deletion_log
             ORDER BY deletedAt ASC, id ASC",
        )?;
        let entries = stmt
            .query_map([], parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn mark_synced(&self, id: i64) -> Result<()> {
        let conn = self.store.lock()?;
        conn.execute("UPDATE deletion_log SET synced = 1 WHERE id = ?", [id])?;
        Ok(())
    }

    pub fn mark_synced_many(&self, ids: &[i64]) -> Result<()> {
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare("UPDATE deletion_log SET synced = 1 WHERE id = ?")?;
        for id in ids {
            stmt.execute([id])?;
        }
        Ok(())
    }

    /// Drop synced tombstones older than the given instant.
    ///
    /// Pruning a tombstone a slow peer has not observed yet lets that peer
    /// resurrect the record, so callers pick a retention window longer than
    /// the largest expected gap between syncs.
    pub fn prune_synced(&self, older_than_ms: i64) -> Result<usize> {
        let conn = self.store.lock()?;
        let pruned = conn.execute(
            "DELETE FROM deletion_log WHERE synced = 1 AND deletedAt < ?",
            [older_than_ms],
        )?;
        Ok(pruned)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, table: &str, uuid: &Uuid) -> Result<Option<DeletionLogEntry>> {
        use rusqlite::OptionalExtension;

        let conn = self.store.lock()?;
        let entry = conn
            .query_row(
                "SELECT id, tableName, recordUuid, deletedAt, synced
                 FROM deletion_log WHERE tableName = ? AND recordUuid = ?",
                params![table, uuid.to_string()],
                parse_entry,
            )
            .optional()?;
        Ok(entry)
    }
}

/// Record a tombstone, replacing any earlier one for the same record.
///
/// Called inside the table manager's delete transaction so the row never
/// disappears without its ledger entry.
pub(crate) fn append(
    conn: &Connection,
    table: &str,
    uuid: &Uuid,
    deleted_at: i64,
    synced: bool,
) -> Result<()> {
    conn.execute(
        "INSERT INTO deletion_log (tableName, recordUuid, deletedAt, synced)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(tableName, recordUuid) DO UPDATE SET
             deletedAt = excluded.deletedAt,
             synced = excluded.synced",
        params![table, uuid.to_string(), deleted_at, i32::from(synced)],
    )?;
    Ok(())
}

fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeletionLogEntry> {
    let raw_uuid: String = row.get(2)?;
    let record_uuid = raw_uuid.parse::<Uuid>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(error))
    })?;
    Ok(DeletionLogEntry {
        id: Some(row.get(0)?),
        table_name: row.get(1)?,
        record_uuid,
        deleted_at: row.get(3)?,
        synced: row.get::<_, i32>(4)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tables::standard_registry;

    fn setup() -> Store {
        Store::open_in_memory(Arc::new(standard_registry())).unwrap()
    }

    fn append_direct(store: &Store, table: &str, uuid: &Uuid, deleted_at: i64) {
        let conn = store.lock().unwrap();
        append(&conn, table, uuid, deleted_at, false).unwrap();
    }

    #[test]
    fn repeated_deletes_do_not_multiply_tombstones() {
        let store = setup();
        let uuid = Uuid::now_v7();

        append_direct(&store, "notes", &uuid, 100);
        append_direct(&store, "notes", &uuid, 200);

        let entries = store.deletion_log().list_unsynced().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].deleted_at, 200);
    }

    #[test]
    fn unsynced_entries_come_back_in_deletion_order() {
        let store = setup();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();

        append_direct(&store, "notes", &second, 500);
        append_direct(&store, "tasks", &first, 100);

        let entries = store.deletion_log().list_unsynced().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record_uuid, first);
        assert_eq!(entries[1].record_uuid, second);
    }

    #[test]
    fn mark_synced_hides_entry_from_unsynced_list() {
        let store = setup();
        let uuid = Uuid::now_v7();
        append_direct(&store, "notes", &uuid, 100);

        let log = store.deletion_log();
        let entry = &log.list_unsynced().unwrap()[0];
        log.mark_synced(entry.id.unwrap()).unwrap();

        assert!(log.list_unsynced().unwrap().is_empty());
        assert_eq!(log.list_all().unwrap().len(), 1);
    }

    #[test]
    fn prune_drops_only_old_synced_entries() {
        let store = setup();
        let old_synced = Uuid::now_v7();
        let old_pending = Uuid::now_v7();
        let fresh = Uuid::now_v7();

        append_direct(&store, "notes", &old_synced, 100);
        append_direct(&store, "notes", &old_pending, 150);
        append_direct(&store, "notes", &fresh, 900);

        let log = store.deletion_log();
        let id = log.get("notes", &old_synced).unwrap().unwrap().id.unwrap();
        log.mark_synced(id).unwrap();

        let pruned = log.prune_synced(500).unwrap();
        assert_eq!(pruned, 1);

        let remaining = log.list_all().unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|entry| entry.record_uuid != old_synced));
    }
}
