//! Data models shared across the reconciliation engine

mod change;
mod record;
mod snapshot;
mod summary;
mod tombstone;

pub use change::{Change, ChangeKind};
pub use record::{now_ms, Record};
pub use snapshot::{Snapshot, DELETION_LOG_KEY};
pub use summary::{RowError, SyncSummary, TableCounts, TableReport};
pub use tombstone::DeletionLogEntry;
