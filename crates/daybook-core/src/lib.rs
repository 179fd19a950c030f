//! Daybook core: a schema-driven record store with a two-device
//! reconciliation engine.
//!
//! One device runs the embedded store ([`db::Store`]) with every domain
//! table described as data ([`schema::TableDescriptor`]). Deletions are
//! recorded in an append-only tombstone ledger so they can outlive the rows
//! they refer to. The [`merge`] module contains the pure conflict rules;
//! [`sync`] drives a session against the counterpart device over HTTP.

pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod schema;
pub mod sync;
pub mod tables;

pub use db::{DeletionLog, Store, TableManager, WriteOrigin};
pub use error::{Error, Result};
pub use merge::{merge_table, TableMerge, TiePreference};
pub use models::{
    Change, ChangeKind, DeletionLogEntry, Record, RowError, Snapshot, SyncSummary,
};
pub use schema::{ColumnKind, SchemaRegistry, TableDescriptor};
pub use sync::{SyncError, SyncOptions, SyncOrchestrator, SyncPhase, SyncTransport};
pub use tables::standard_registry;
