//! Sync summary reporting

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Change;

/// Per-table row counts accumulated during diff and apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TableCounts {
    pub fn absorb(&mut self, other: Self) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// One row that could not be merged or applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub table: String,
    pub record_uuid: Option<Uuid>,
    pub detail: String,
}

impl RowError {
    #[must_use]
    pub fn new(table: impl Into<String>, record_uuid: Option<Uuid>, detail: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            record_uuid,
            detail: detail.into(),
        }
    }
}

/// Counts plus the audited change list for one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub counts: TableCounts,
    pub changes: Vec<Change>,
}

/// Human-auditable result of one sync session, produced before anything is
/// committed and updated during apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub tables: BTreeMap<String, TableReport>,
    /// Row-level merge/apply failures (recorded, never fatal to the session)
    pub errors: Vec<RowError>,
    /// Pre-merge validation failures observed on the client side
    pub client_errors: Vec<String>,
}

impl SyncSummary {
    /// Global totals across every table
    #[must_use]
    pub fn totals(&self) -> TableCounts {
        let mut totals = TableCounts::default();
        for report in self.tables.values() {
            totals.absorb(report.counts);
        }
        totals
    }

    /// Whether the merge found nothing to change anywhere
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.tables.values().all(|report| report.changes.is_empty()) && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Change, ChangeKind, Record};

    #[test]
    fn totals_aggregate_across_tables() {
        let mut summary = SyncSummary::default();
        summary.tables.insert(
            "notes".to_string(),
            TableReport {
                counts: TableCounts {
                    processed: 3,
                    created: 1,
                    updated: 1,
                    skipped: 1,
                    failed: 0,
                },
                changes: Vec::new(),
            },
        );
        summary.tables.insert(
            "tasks".to_string(),
            TableReport {
                counts: TableCounts {
                    processed: 2,
                    created: 0,
                    updated: 0,
                    skipped: 1,
                    failed: 1,
                },
                changes: Vec::new(),
            },
        );

        let totals = summary.totals();
        assert_eq!(totals.processed, 5);
        assert_eq!(totals.created, 1);
        assert_eq!(totals.failed, 1);
    }

    #[test]
    fn noop_summary_has_no_changes_or_errors() {
        let mut summary = SyncSummary::default();
        summary
            .tables
            .insert("notes".to_string(), TableReport::default());
        assert!(summary.is_noop());

        summary
            .tables
            .get_mut("notes")
            .unwrap()
            .changes
            .push(Change::new(ChangeKind::Added, Record::new()));
        assert!(!summary.is_noop());
    }
}
