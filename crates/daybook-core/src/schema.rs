//! Table descriptors and the schema registry.
//!
//! Every domain table is described as data: its name, typed columns, the
//! conflict-resolution keys, and its relationship to the sync machinery.
//! Descriptors are validated at construction so a malformed one is rejected
//! before the first query is built from it.

use std::collections::BTreeMap;

use thiserror::Error;

/// Device-local autoincrement primary key; never exchanged between devices.
pub const COL_LOCAL_ID: &str = "id";
/// Globally unique record identity; the only key trusted across devices.
pub const COL_UUID: &str = "uuid";
/// Creation timestamp (unix ms), set once and never overwritten by merge.
pub const COL_CREATED_AT: &str = "createdAt";
/// Logical clock (unix ms); the sole tie-breaker for conflicting edits.
pub const COL_UPDATED_AT: &str = "updatedAt";
/// Optional marker suppressing clock advancement for sync-originated writes.
pub const COL_SYNCED: &str = "synced";

const RESERVED_COLUMNS: [&str; 5] = [
    COL_LOCAL_ID,
    COL_UUID,
    COL_CREATED_AT,
    COL_UPDATED_AT,
    COL_SYNCED,
];

/// Errors raised while building or registering table descriptors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),
    #[error("Invalid column name {column:?} in table {table}")]
    InvalidColumnName { table: String, column: String },
    #[error("Duplicate column {column} in table {table}")]
    DuplicateColumn { table: String, column: String },
    #[error("Column {column} is reserved and implicit in every table ({table})")]
    ReservedColumn { table: String, column: String },
    #[error("Business key {column} is not a declared column of table {table}")]
    UnknownBusinessKey { table: String, column: String },
    #[error("Table {0} lists itself as a cascade dependent")]
    SelfDependent(String),
    #[error("Duplicate table {0} in registry")]
    DuplicateTable(String),
    #[error("Table {table} declares unregistered dependent table {dependent}")]
    UnknownDependent { table: String, dependent: String },
    #[error("Dependent table {dependent} has no column {column} referencing {table}")]
    MissingDependentColumn {
        table: String,
        dependent: String,
        column: String,
    },
    #[error("Unknown table: {0}")]
    UnknownTable(String),
}

/// Storage type of a domain column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Boolean,
    /// Unix-millisecond instant, stored as an integer
    Timestamp,
}

impl ColumnKind {
    pub(crate) const fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean | Self::Timestamp => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

/// A single declared domain column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

/// A child table whose rows are deleted and tombstoned together with their parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeDependent {
    /// Name of the dependent table
    pub table: String,
    /// Column on the dependent table holding the parent record's uuid
    pub parent_column: String,
}

/// Static metadata describing one domain table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<ColumnDef>,
    business_key: Option<String>,
    local_only: bool,
    tracks_synced: bool,
    dependents: Vec<CascadeDependent>,
}

impl TableDescriptor {
    /// Start building a descriptor for the named table
    pub fn builder(name: impl Into<String>) -> TableDescriptorBuilder {
        TableDescriptorBuilder {
            name: name.into(),
            columns: Vec::new(),
            business_key: None,
            local_only: false,
            tracks_synced: false,
            dependents: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Additional business-unique conflict key (e.g. a settings name)
    pub fn business_key(&self) -> Option<&str> {
        self.business_key.as_deref()
    }

    /// Derived tables are recomputed locally and excluded from the synced set
    pub const fn is_syncable(&self) -> bool {
        !self.local_only
    }

    /// Whether rows carry the `synced` marker column
    pub const fn tracks_synced(&self) -> bool {
        self.tracks_synced
    }

    pub fn dependents(&self) -> &[CascadeDependent] {
        &self.dependents
    }
}

/// Validating builder for [`TableDescriptor`]
pub struct TableDescriptorBuilder {
    name: String,
    columns: Vec<ColumnDef>,
    business_key: Option<String>,
    local_only: bool,
    tracks_synced: bool,
    dependents: Vec<CascadeDependent>,
}

impl TableDescriptorBuilder {
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            kind,
        });
        self
    }

    #[must_use]
    pub fn business_key(mut self, column: impl Into<String>) -> Self {
        self.business_key = Some(column.into());
        self
    }

    #[must_use]
    pub const fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    #[must_use]
    pub const fn tracks_synced(mut self) -> Self {
        self.tracks_synced = true;
        self
    }

    #[must_use]
    pub fn cascade(mut self, table: impl Into<String>, parent_column: impl Into<String>) -> Self {
        self.dependents.push(CascadeDependent {
            table: table.into(),
            parent_column: parent_column.into(),
        });
        self
    }

    pub fn build(self) -> Result<TableDescriptor, SchemaError> {
        if !is_valid_identifier(&self.name) {
            return Err(SchemaError::InvalidTableName(self.name));
        }

        let mut seen = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            if !is_valid_identifier(&column.name) {
                return Err(SchemaError::InvalidColumnName {
                    table: self.name,
                    column: column.name.clone(),
                });
            }
            if RESERVED_COLUMNS.contains(&column.name.as_str()) {
                return Err(SchemaError::ReservedColumn {
                    table: self.name,
                    column: column.name.clone(),
                });
            }
            if seen.contains(&column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name,
                    column: column.name.clone(),
                });
            }
            seen.push(column.name.as_str());
        }

        if let Some(key) = &self.business_key {
            if !self.columns.iter().any(|column| &column.name == key) {
                return Err(SchemaError::UnknownBusinessKey {
                    table: self.name,
                    column: key.clone(),
                });
            }
        }

        for dependent in &self.dependents {
            if dependent.table == self.name {
                return Err(SchemaError::SelfDependent(self.name));
            }
        }

        Ok(TableDescriptor {
            name: self.name,
            columns: self.columns,
            business_key: self.business_key,
            local_only: self.local_only,
            tracks_synced: self.tracks_synced,
            dependents: self.dependents,
        })
    }
}

/// The validated set of table descriptors known to one device
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableDescriptor>,
}

impl SchemaRegistry {
    /// Build a registry, checking cross-table references
    pub fn new(
        descriptors: impl IntoIterator<Item = TableDescriptor>,
    ) -> Result<Self, SchemaError> {
        let mut tables = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if tables.insert(name.clone(), descriptor).is_some() {
                return Err(SchemaError::DuplicateTable(name));
            }
        }

        for descriptor in tables.values() {
            for dependent in &descriptor.dependents {
                let Some(child) = tables.get(&dependent.table) else {
                    return Err(SchemaError::UnknownDependent {
                        table: descriptor.name.clone(),
                        dependent: dependent.table.clone(),
                    });
                };
                if child.column(&dependent.parent_column).is_none() {
                    return Err(SchemaError::MissingDependentColumn {
                        table: descriptor.name.clone(),
                        dependent: dependent.table.clone(),
                        column: dependent.parent_column.clone(),
                    });
                }
            }
        }

        Ok(Self { tables })
    }

    pub fn get(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&TableDescriptor, SchemaError> {
        self.tables
            .get(name)
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    /// Tables participating in snapshot exchange and merge
    pub fn syncable(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values().filter(|table| table.is_syncable())
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes() -> TableDescriptor {
        TableDescriptor::builder("notes")
            .column("content", ColumnKind::Text)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_accepts_valid_descriptor() {
        let descriptor = TableDescriptor::builder("settings")
            .column("name", ColumnKind::Text)
            .column("value", ColumnKind::Text)
            .business_key("name")
            .build()
            .unwrap();

        assert_eq!(descriptor.name(), "settings");
        assert_eq!(descriptor.business_key(), Some("name"));
        assert!(descriptor.is_syncable());
    }

    #[test]
    fn builder_rejects_invalid_table_name() {
        let result = TableDescriptor::builder("my table").build();
        assert_eq!(
            result.unwrap_err(),
            SchemaError::InvalidTableName("my table".to_string())
        );
    }

    #[test]
    fn builder_rejects_reserved_column() {
        let result = TableDescriptor::builder("notes")
            .column("uuid", ColumnKind::Text)
            .build();
        assert!(matches!(
            result.unwrap_err(),
            SchemaError::ReservedColumn { .. }
        ));
    }

    #[test]
    fn builder_rejects_duplicate_column() {
        let result = TableDescriptor::builder("notes")
            .column("content", ColumnKind::Text)
            .column("content", ColumnKind::Text)
            .build();
        assert!(matches!(
            result.unwrap_err(),
            SchemaError::DuplicateColumn { .. }
        ));
    }

    #[test]
    fn builder_rejects_undeclared_business_key() {
        let result = TableDescriptor::builder("settings")
            .column("value", ColumnKind::Text)
            .business_key("name")
            .build();
        assert!(matches!(
            result.unwrap_err(),
            SchemaError::UnknownBusinessKey { .. }
        ));
    }

    #[test]
    fn builder_rejects_self_dependent() {
        let result = TableDescriptor::builder("notes")
            .column("content", ColumnKind::Text)
            .cascade("notes", "noteUuid")
            .build();
        assert_eq!(
            result.unwrap_err(),
            SchemaError::SelfDependent("notes".to_string())
        );
    }

    #[test]
    fn registry_rejects_unregistered_dependent() {
        let parent = TableDescriptor::builder("habits")
            .column("name", ColumnKind::Text)
            .cascade("habit_entries", "habitUuid")
            .build()
            .unwrap();

        let result = SchemaRegistry::new([parent]);
        assert!(matches!(
            result.unwrap_err(),
            SchemaError::UnknownDependent { .. }
        ));
    }

    #[test]
    fn registry_checks_dependent_reference_column() {
        let parent = TableDescriptor::builder("habits")
            .column("name", ColumnKind::Text)
            .cascade("habit_entries", "habitUuid")
            .build()
            .unwrap();
        let child = TableDescriptor::builder("habit_entries")
            .column("entryDate", ColumnKind::Timestamp)
            .build()
            .unwrap();

        let result = SchemaRegistry::new([parent, child]);
        assert!(matches!(
            result.unwrap_err(),
            SchemaError::MissingDependentColumn { .. }
        ));
    }

    #[test]
    fn registry_resolves_tables() {
        let registry = SchemaRegistry::new([notes()]).unwrap();
        assert!(registry.get("notes").is_some());
        assert!(registry.get("tasks").is_none());
        assert_eq!(
            registry.require("tasks").unwrap_err(),
            SchemaError::UnknownTable("tasks".to_string())
        );
    }

    #[test]
    fn syncable_excludes_local_only_tables() {
        let derived = TableDescriptor::builder("derived")
            .column("value", ColumnKind::Integer)
            .local_only()
            .build()
            .unwrap();
        let registry = SchemaRegistry::new([notes(), derived]).unwrap();

        let syncable: Vec<&str> = registry.syncable().map(TableDescriptor::name).collect();
        assert_eq!(syncable, vec!["notes"]);
    }
}
