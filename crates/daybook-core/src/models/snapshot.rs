//! Snapshot model
//!
//! The unit exchanged over the network: every syncable table's rows on one
//! device at one instant. On the wire it is a single JSON object keyed by
//! table name; the `deletionLog` key carries that device's tombstones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{DeletionLogEntry, Record};

/// Wire key under which tombstones ride along with the table rows
pub const DELETION_LOG_KEY: &str = "deletionLog";

/// Full dataset of one device at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Vec<Record>>",
    into = "BTreeMap<String, Vec<Record>>"
)]
pub struct Snapshot {
    pub tables: BTreeMap<String, Vec<Record>>,
    pub tombstones: Vec<DeletionLogEntry>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, name: impl Into<String>, rows: Vec<Record>) {
        self.tables.insert(name.into(), rows);
    }

    pub fn rows(&self, table: &str) -> &[Record] {
        self.tables.get(table).map_or(&[], Vec::as_slice)
    }

    /// True when no table holds any row and no tombstone is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty) && self.tombstones.is_empty()
    }
}

impl TryFrom<BTreeMap<String, Vec<Record>>> for Snapshot {
    type Error = String;

    fn try_from(mut raw: BTreeMap<String, Vec<Record>>) -> Result<Self, Self::Error> {
        let tombstones = match raw.remove(DELETION_LOG_KEY) {
            None => Vec::new(),
            Some(rows) => rows
                .into_iter()
                .map(|row| {
                    serde_json::from_value::<DeletionLogEntry>(serde_json::to_value(&row)?)
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| format!("malformed {DELETION_LOG_KEY} entry: {error}"))?,
        };

        Ok(Self {
            tables: raw,
            tombstones,
        })
    }
}

impl From<Snapshot> for BTreeMap<String, Vec<Record>> {
    fn from(snapshot: Snapshot) -> Self {
        let mut raw = snapshot.tables;
        let log_rows = snapshot
            .tombstones
            .iter()
            .filter_map(|entry| serde_json::to_value(entry).ok())
            .filter_map(|value| serde_json::from_value::<Record>(value).ok())
            .collect();
        raw.insert(DELETION_LOG_KEY.to_string(), log_rows);
        raw
    }
}
