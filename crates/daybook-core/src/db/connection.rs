//! Store connection management
//!
//! One `Store` owns the embedded database of a single device. All access is
//! serialized through an internal mutex, the single writer queue that keeps
//! apply-phase writes and concurrent domain writes from interleaving.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use super::deletion_log::DeletionLog;
use super::migrations;
use super::table::TableManager;
use crate::error::{Error, Result};
use crate::models::Snapshot;
use crate::schema::SchemaRegistry;

/// Device-local record store over the registered schema
pub struct Store {
    conn: Mutex<Connection>,
    registry: Arc<SchemaRegistry>,
}

impl Store {
    /// Open a store at the given path, creating it if it doesn't exist.
    ///
    /// Creates any missing tables from the registry idempotently.
    pub fn open(path: impl AsRef<Path>, registry: Arc<SchemaRegistry>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, registry)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory(registry: Arc<SchemaRegistry>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, registry)
    }

    fn from_connection(conn: Connection, registry: Arc<SchemaRegistry>) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn, &registry)?;
        Ok(Self {
            conn: Mutex::new(conn),
            registry,
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Table manager for a registered table; unknown names are schema errors
    pub fn table(&self, name: &str) -> Result<TableManager<'_>> {
        let descriptor = self.registry.require(name)?;
        Ok(TableManager::new(self, descriptor))
    }

    pub const fn deletion_log(&self) -> DeletionLog<'_> {
        DeletionLog::new(self)
    }

    /// Full snapshot of every syncable table plus the deletion log
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for descriptor in self.registry.syncable() {
            let rows = self
                .table(descriptor.name())?
                .list()?
                .iter()
                .map(crate::models::Record::portable)
                .collect();
            snapshot.insert_table(descriptor.name(), rows);
        }
        snapshot.tombstones = self.deletion_log().list_all()?;
        Ok(snapshot)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("store writer lock poisoned".to_string()))
    }
}

/// Configure `SQLite` for safe concurrent use
fn configure(conn: &Connection) -> Result<()> {
    // WAL may be unavailable on some filesystems; the rest must hold
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::standard_registry;

    #[test]
    fn open_in_memory_registers_schema() {
        let store = Store::open_in_memory(Arc::new(standard_registry())).unwrap();
        assert!(store.table("notes").is_ok());
        assert!(store.table("no_such_table").is_err());
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("daybook.db");
        let store = Store::open(&path, Arc::new(standard_registry())).unwrap();
        drop(store);
        assert!(path.exists());
    }

    #[test]
    fn snapshot_covers_syncable_tables_only() {
        let store = Store::open_in_memory(Arc::new(standard_registry())).unwrap();
        let snapshot = store.snapshot().unwrap();

        assert!(snapshot.tables.contains_key("notes"));
        assert!(snapshot.tables.contains_key("tasks"));
        // Derived per-date expansions stay on the device
        assert!(!snapshot.tables.contains_key("habit_entries"));
    }
}
