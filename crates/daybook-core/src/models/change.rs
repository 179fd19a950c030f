//! Merge audit trail types

use serde::{Deserialize, Serialize};

use super::Record;

/// How the merge engine classified one touched record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Present on only one side; kept in the union
    Added,
    /// Both sides present, the strictly newer timestamp won
    Modified,
    /// Dropped because a tombstone was newer than the row's last edit
    Removed,
    /// Equal timestamps with differing fields; one side survived by preference
    Duplicated,
}

/// The atomic unit of the merge's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub item: Record,
}

impl Change {
    #[must_use]
    pub const fn new(kind: ChangeKind, item: Record) -> Self {
        Self { kind, item }
    }
}
