//! Deletion log entry model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One tombstone recording that a record was deleted on this device.
///
/// Entries are uniqued on `(tableName, recordUuid)` by the deletion log, so
/// deleting the same record twice does not multiply tombstones. The local row
/// id stays on the device; the remaining fields travel to the counterpart as
/// camelCase JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionLogEntry {
    /// Device-local row id; absent on entries received over the wire
    #[serde(skip)]
    pub id: Option<i64>,
    pub table_name: String,
    pub record_uuid: Uuid,
    /// Deletion instant (unix ms), compared against `updatedAt` during merge
    pub deleted_at: i64,
    #[serde(default)]
    pub synced: bool,
}

impl DeletionLogEntry {
    #[must_use]
    pub fn new(table_name: impl Into<String>, record_uuid: Uuid, deleted_at: i64) -> Self {
        Self {
            id: None,
            table_name: table_name.into(),
            record_uuid,
            deleted_at,
            synced: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_uses_camel_case_without_local_id() {
        let entry = DeletionLogEntry {
            id: Some(7),
            table_name: "notes".to_string(),
            record_uuid: "018f4aa2-0000-7000-8000-000000000001".parse().unwrap(),
            deleted_at: 1234,
            synced: false,
        };

        let rendered = serde_json::to_value(&entry).unwrap();
        assert_eq!(rendered["tableName"], "notes");
        assert_eq!(rendered["deletedAt"], 1234);
        assert_eq!(rendered["synced"], false);
        assert!(rendered.get("id").is_none());
    }

    #[test]
    fn deserializes_without_synced_marker() {
        let entry: DeletionLogEntry = serde_json::from_str(
            r#"{"tableName":"tasks","recordUuid":"018f4aa2-0000-7000-8000-000000000002","deletedAt":99}"#,
        )
        .unwrap();
        assert_eq!(entry.table_name, "tasks");
        assert!(!entry.synced);
        assert!(entry.id.is_none());
    }
}
