//! Merge engine
//!
//! Pure functions from two table snapshots (plus tombstones) to a merged
//! table and an audit trail. Nothing here touches the store; the orchestrator
//! feeds it data and applies its output, which keeps every rule below
//! testable without a database.
//!
//! The rules, in application order:
//! 1. rows missing a usable identity are excluded and reported
//! 2. the union of both sides is the baseline; one-sided rows are `added`
//! 3. for rows on both sides the strictly newer `updatedAt` wins entirely
//!    and is classified `modified`, even when only the clock differs, so
//!    application converges both devices on the newer stamp; equal
//!    timestamps with identical fields are skipped, with differing fields
//!    classified `duplicated` and settled by [`TiePreference`]
//! 4. a tombstone drops a surviving row only when `deletedAt` is strictly
//!    newer than the row's `updatedAt`; an edit stamped after the deletion
//!    resurrects the record

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::models::{Change, ChangeKind, DeletionLogEntry, Record, RowError, TableCounts};

/// How to settle a conflict with equal timestamps and differing fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TiePreference {
    /// The counterpart's row survives
    #[default]
    PreferRemote,
    /// This device's row survives
    PreferLocal,
    /// Field-level union of both rows, counterpart winning overlapping fields
    MergeFields,
}

/// Outcome of merging one table
#[derive(Debug, Clone, Default)]
pub struct TableMerge {
    /// The merged rows, ordered by uuid
    pub merged: Vec<Record>,
    /// One entry per row the merge touched
    pub changes: Vec<Change>,
    pub counts: TableCounts,
    /// Rows excluded from the merge, with the reason
    pub errors: Vec<RowError>,
}

/// Merge the local and remote versions of one table.
///
/// Only tombstones addressed to `table` are considered; passing the whole
/// ledger is fine.
#[must_use]
pub fn merge_table(
    table: &str,
    local: &[Record],
    remote: &[Record],
    tombstones: &[DeletionLogEntry],
    tie: TiePreference,
) -> TableMerge {
    let mut errors = Vec::new();
    let local = index_side(table, local, &mut errors);
    let remote = index_side(table, remote, &mut errors);

    // uuid -> (survivor, provisional classification)
    let mut survivors: BTreeMap<Uuid, (Record, Option<ChangeKind>)> = BTreeMap::new();

    for (uuid, row) in &local {
        match remote.get(uuid) {
            None => {
                survivors.insert(*uuid, (row.clone(), Some(ChangeKind::Added)));
            }
            Some(other) => {
                survivors.insert(*uuid, resolve_pair(row, other, tie));
            }
        }
    }
    for (uuid, row) in &remote {
        if !local.contains_key(uuid) {
            survivors.insert(*uuid, (row.clone(), Some(ChangeKind::Added)));
        }
    }

    let mut counts = TableCounts {
        processed: survivors.len(),
        failed: errors.len(),
        ..TableCounts::default()
    };

    let mut changes = Vec::new();
    for entry in tombstones {
        if entry.table_name != table {
            continue;
        }
        let deleted = survivors
            .get(&entry.record_uuid)
            .is_some_and(|(row, _)| entry.deleted_at > timestamp_of(row));
        if deleted {
            if let Some((row, _)) = survivors.remove(&entry.record_uuid) {
                changes.push(Change {
                    kind: ChangeKind::Removed,
                    item: row,
                });
            }
        }
    }

    let mut merged = Vec::with_capacity(survivors.len());
    for (_, (row, kind)) in survivors {
        match kind {
            Some(ChangeKind::Added) => counts.created += 1,
            Some(ChangeKind::Modified | ChangeKind::Duplicated) => counts.updated += 1,
            Some(ChangeKind::Removed) | None => counts.skipped += 1,
        }
        if let Some(kind) = kind {
            changes.push(Change {
                kind,
                item: row.clone(),
            });
        }
        merged.push(row);
    }

    TableMerge {
        merged,
        changes,
        counts,
        errors,
    }
}

/// Index one side by uuid, excluding unusable rows.
///
/// A duplicate uuid within a single side keeps the newer row and reports the
/// older one, so no-duplicate-identity holds even for corrupt input.
fn index_side(
    table: &str,
    rows: &[Record],
    errors: &mut Vec<RowError>,
) -> BTreeMap<Uuid, Record> {
    let mut indexed: BTreeMap<Uuid, Record> = BTreeMap::new();
    for row in rows {
        let Some(uuid) = row.uuid() else {
            errors.push(RowError {
                table: table.to_string(),
                record_uuid: None,
                detail: "row has no usable uuid".to_string(),
            });
            continue;
        };
        match indexed.get(&uuid) {
            Some(existing) => {
                let newer = timestamp_of(row) > timestamp_of(existing);
                errors.push(RowError {
                    table: table.to_string(),
                    record_uuid: Some(uuid),
                    detail: "duplicate uuid within one side, older row dropped".to_string(),
                });
                if newer {
                    indexed.insert(uuid, row.clone());
                }
            }
            None => {
                indexed.insert(uuid, row.clone());
            }
        }
    }
    indexed
}

/// Settle a row present on both sides
fn resolve_pair(
    local: &Record,
    remote: &Record,
    tie: TiePreference,
) -> (Record, Option<ChangeKind>) {
    let local_at = timestamp_of(local);
    let remote_at = timestamp_of(remote);

    if local_at != remote_at {
        // The winner is always a change to report: apply walks the change
        // list, and adopting the newer clock is what makes both devices
        // converge on the same timestamp.
        let winner = if local_at > remote_at { local } else { remote };
        return (winner.clone(), Some(ChangeKind::Modified));
    }

    if local.content_eq(remote) {
        return (local.clone(), None);
    }

    let survivor = match tie {
        TiePreference::PreferRemote => remote.clone(),
        TiePreference::PreferLocal => local.clone(),
        TiePreference::MergeFields => merge_fields(local, remote),
    };
    (survivor, Some(ChangeKind::Duplicated))
}

/// Field union of both rows; the remote value wins where both define a field
fn merge_fields(local: &Record, remote: &Record) -> Record {
    let mut merged = local.clone();
    for (name, value) in remote.fields() {
        merged.set(name.clone(), value.clone());
    }
    merged
}

fn timestamp_of(row: &Record) -> i64 {
    row.updated_at().or_else(|| row.created_at()).unwrap_or(0)
}
