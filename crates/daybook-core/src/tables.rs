//! The standard table set
//!
//! Descriptors for the tracker's built-in tables. Anything not listed here
//! has to be registered by the embedding application before the store opens.

use crate::schema::{ColumnKind, SchemaRegistry, TableDescriptor};

/// Registry holding the tracker's built-in tables.
///
/// The descriptors are static and validated at startup, so a failure here is
/// a programming error rather than a runtime condition.
#[must_use]
pub fn standard_registry() -> SchemaRegistry {
    let notes = TableDescriptor::builder("notes")
        .column("content", ColumnKind::Text)
        .column("pinned", ColumnKind::Boolean)
        .cascade("note_attributes", "noteUuid")
        .build()
        .expect("notes descriptor is valid");

    let note_attributes = TableDescriptor::builder("note_attributes")
        .column("noteUuid", ColumnKind::Text)
        .column("attributeDate", ColumnKind::Timestamp)
        .column("name", ColumnKind::Text)
        .column("value", ColumnKind::Text)
        .build()
        .expect("note_attributes descriptor is valid");

    let tasks = TableDescriptor::builder("tasks")
        .column("title", ColumnKind::Text)
        .column("completed", ColumnKind::Boolean)
        .column("dueAt", ColumnKind::Timestamp)
        .tracks_synced()
        .build()
        .expect("tasks descriptor is valid");

    let habits = TableDescriptor::builder("habits")
        .column("name", ColumnKind::Text)
        .column("schedule", ColumnKind::Text)
        .column("archived", ColumnKind::Boolean)
        .cascade("habit_entries", "habitUuid")
        .build()
        .expect("habits descriptor is valid");

    // Per-day completion marks are derived from the habit schedule on each
    // device and never travel over sync.
    let habit_entries = TableDescriptor::builder("habit_entries")
        .column("habitUuid", ColumnKind::Text)
        .column("entryDate", ColumnKind::Timestamp)
        .column("completed", ColumnKind::Boolean)
        .local_only()
        .build()
        .expect("habit_entries descriptor is valid");

    let transactions = TableDescriptor::builder("transactions")
        .column("amount", ColumnKind::Real)
        .column("category", ColumnKind::Text)
        .column("memo", ColumnKind::Text)
        .column("occurredAt", ColumnKind::Timestamp)
        .build()
        .expect("transactions descriptor is valid");

    let settings = TableDescriptor::builder("settings")
        .column("name", ColumnKind::Text)
        .column("value", ColumnKind::Text)
        .business_key("name")
        .build()
        .expect("settings descriptor is valid");

    SchemaRegistry::new([
        notes,
        note_attributes,
        tasks,
        habits,
        habit_entries,
        transactions,
        settings,
    ])
    .expect("standard registry is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_builds() {
        let registry = standard_registry();
        assert!(registry.get("notes").is_some());
        assert!(registry.get("settings").is_some());
        assert!(registry.get("deletion_log").is_none());
    }

    #[test]
    fn local_only_tables_are_excluded_from_sync() {
        let registry = standard_registry();
        let syncable: Vec<&str> = registry.syncable().map(|d| d.name()).collect();
        assert!(syncable.contains(&"notes"));
        assert!(!syncable.contains(&"habit_entries"));
    }

    #[test]
    fn settings_carry_a_business_key() {
        let registry = standard_registry();
        let settings = registry.get("settings").unwrap();
        assert_eq!(settings.business_key(), Some("name"));
    }
}
