//! Sync session orchestration
//!
//! Drives one reconciliation session through its phases: fetch the
//! counterpart's snapshot, diff it against the local store, wait for the
//! user's confirmation, then apply. Only one session runs at a time; the
//! diff is computed on consistent snapshots and nothing is written before
//! the apply phase begins.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::transport::{SyncTransport, TransportError};
use crate::db::{Store, WriteOrigin};
use crate::error::Error;
use crate::merge::{merge_table, TableMerge, TiePreference};
use crate::models::{
    ChangeKind, DeletionLogEntry, RowError, Snapshot, SyncSummary, TableReport,
};
use crate::schema::SchemaRegistry;

/// Errors ending or refusing a sync session
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The pulled snapshot does not match the registered schema
    #[error("Invalid counterpart snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("A sync session is already in progress")]
    SessionInProgress,
    #[error("No prepared merge is awaiting confirmation")]
    NothingPending,
    #[error(transparent)]
    Store(#[from] Error),
}

/// Observable phase of the session state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    Fetching,
    Diffing,
    AwaitingConfirmation,
    Applying,
    Error,
}

/// Per-session knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub tie: TiePreference,
    /// Push pending tombstones before pulling, so the counterpart's snapshot
    /// no longer contains rows this device already deleted. When unset the
    /// push happens best-effort after apply.
    pub push_tombstones_first: bool,
}

/// A computed merge waiting for the user's go-ahead
struct PendingMerge {
    merges: BTreeMap<String, TableMerge>,
    summary: SyncSummary,
}

/// Drives sync sessions against one counterpart
pub struct SyncOrchestrator {
    store: Arc<Store>,
    transport: SyncTransport,
    options: SyncOptions,
    phase: Mutex<SyncPhase>,
    pending: Mutex<Option<PendingMerge>>,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<Store>, transport: SyncTransport, options: SyncOptions) -> Self {
        Self {
            store,
            transport,
            options,
            phase: Mutex::new(SyncPhase::Idle),
            pending: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.lock().map_or(SyncPhase::Error, |guard| *guard)
    }

    /// Fetch, validate, and diff; returns the summary to show the user.
    ///
    /// Nothing is written to the store. The computed merge is held until
    /// [`apply`](Self::apply) or [`cancel`](Self::cancel).
    pub async fn prepare(&self) -> Result<SyncSummary, SyncError> {
        self.begin()?;
        match self.prepare_inner().await {
            Ok(summary) => {
                self.set_phase(SyncPhase::AwaitingConfirmation);
                Ok(summary)
            }
            Err(error) => {
                self.clear_pending();
                self.set_phase(SyncPhase::Error);
                Err(error)
            }
        }
    }

    /// Apply the prepared merge table by table.
    ///
    /// Row failures are recorded and skipped rather than rolling back the
    /// session; a partially applied sync converges on the next run because
    /// apply is built from idempotent upserts and removals.
    pub async fn apply(&self) -> Result<SyncSummary, SyncError> {
        let pending = {
            let mut phase = self
                .phase
                .lock()
                .map_err(|_| Error::Database("session lock poisoned".to_string()))?;
            if *phase != SyncPhase::AwaitingConfirmation {
                return Err(SyncError::NothingPending);
            }
            let Some(pending) = self.take_pending() else {
                return Err(SyncError::NothingPending);
            };
            *phase = SyncPhase::Applying;
            pending
        };

        let mut summary = pending.summary;

        for (name, merge) in pending.merges {
            let table = match self.store.table(&name) {
                Ok(table) => table,
                Err(error) => {
                    summary
                        .errors
                        .push(RowError::new(&name, None, error.to_string()));
                    continue;
                }
            };

            let report = summary.tables.entry(name.clone()).or_default();
            for change in &merge.changes {
                let result = match change.kind {
                    ChangeKind::Removed => change
                        .item
                        .uuid()
                        .ok_or_else(|| Error::InvalidRecord("removal without uuid".to_string()))
                        .and_then(|uuid| table.remove_for_sync(&uuid).map(|_| ())),
                    ChangeKind::Added | ChangeKind::Modified | ChangeKind::Duplicated => table
                        .upsert(change.item.portable(), WriteOrigin::Sync)
                        .map(|_| ()),
                };
                if let Err(error) = result {
                    report.counts.failed += 1;
                    summary
                        .errors
                        .push(RowError::new(&name, change.item.uuid(), error.to_string()));
                }
            }
            tracing::info!(table = %name, changes = merge.changes.len(), "Applied table");
        }

        if !self.options.push_tombstones_first {
            if let Err(error) = self.push_pending_tombstones().await {
                // The counterpart going away mid-session must not undo the
                // local apply; the tombstones stay queued for the next run.
                tracing::warn!(error = %error, "Tombstone push failed after apply");
                summary
                    .client_errors
                    .push(format!("tombstone push failed: {error}"));
            }
        }

        self.set_phase(SyncPhase::Idle);
        Ok(summary)
    }

    /// Discard a prepared merge (or clear an error) and return to idle
    pub fn cancel(&self) {
        self.clear_pending();
        self.set_phase(SyncPhase::Idle);
    }

    async fn prepare_inner(&self) -> Result<SyncSummary, SyncError> {
        if self.options.push_tombstones_first {
            self.push_pending_tombstones().await?;
        }

        let remote = self.transport.pull_snapshot().await?;
        let client_errors = validate_snapshot(self.store.registry(), &remote)?;

        self.set_phase(SyncPhase::Diffing);
        let local = self.store.snapshot()?;
        let (merges, mut summary) =
            diff_snapshots(self.store.registry(), &local, &remote, self.options.tie);
        summary.client_errors = client_errors;

        let summary_out = summary.clone();
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(PendingMerge { merges, summary });
        }
        Ok(summary_out)
    }

    /// Push unsynced tombstones and mark them synced on success
    async fn push_pending_tombstones(&self) -> Result<(), SyncError> {
        let entries = self.store.deletion_log().list_unsynced()?;
        if entries.is_empty() {
            return Ok(());
        }

        let receipt = self.transport.push_tombstones(&entries).await?;
        tracing::info!(
            pushed = entries.len(),
            applied = receipt.applied,
            skipped = receipt.skipped,
            "Counterpart acknowledged tombstones"
        );

        let ids: Vec<i64> = entries.iter().filter_map(|entry| entry.id).collect();
        self.store.deletion_log().mark_synced_many(&ids)?;
        Ok(())
    }

    fn begin(&self) -> Result<(), SyncError> {
        let mut phase = self
            .phase
            .lock()
            .map_err(|_| Error::Database("session lock poisoned".to_string()))?;
        match *phase {
            SyncPhase::Idle | SyncPhase::Error => {
                *phase = SyncPhase::Fetching;
                Ok(())
            }
            _ => Err(SyncError::SessionInProgress),
        }
    }

    fn set_phase(&self, next: SyncPhase) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = next;
        }
    }

    fn take_pending(&self) -> Option<PendingMerge> {
        self.pending.lock().ok().and_then(|mut guard| guard.take())
    }

    fn clear_pending(&self) {
        if let Ok(mut guard) = self.pending.lock() {
            *guard = None;
        }
    }

    #[cfg(test)]
    fn install_pending(&self, merges: BTreeMap<String, TableMerge>, summary: SyncSummary) {
        *self.pending.lock().unwrap() = Some(PendingMerge { merges, summary });
        self.set_phase(SyncPhase::AwaitingConfirmation);
    }
}

/// Check a pulled snapshot against the registered schema before anything is
/// written. Returns non-fatal anomalies for the summary's client error list.
fn validate_snapshot(
    registry: &SchemaRegistry,
    snapshot: &Snapshot,
) -> Result<Vec<String>, SyncError> {
    for descriptor in registry.syncable() {
        if !snapshot.tables.contains_key(descriptor.name()) {
            return Err(SyncError::InvalidSnapshot(format!(
                "missing table {:?}",
                descriptor.name()
            )));
        }
    }

    for name in snapshot.tables.keys() {
        match registry.get(name) {
            None => {
                return Err(SyncError::InvalidSnapshot(format!(
                    "unexpected table {name:?}"
                )));
            }
            Some(descriptor) if !descriptor.is_syncable() => {
                return Err(SyncError::InvalidSnapshot(format!(
                    "table {name:?} never leaves its device"
                )));
            }
            Some(_) => {}
        }
    }

    let mut warnings = Vec::new();
    for entry in &snapshot.tombstones {
        if registry.get(&entry.table_name).is_none() {
            warnings.push(format!(
                "tombstone for unknown table {:?} ignored",
                entry.table_name
            ));
        }
    }
    Ok(warnings)
}

/// Merge every syncable table of two snapshots.
///
/// Both sides' tombstones participate: a deletion recorded on either device
/// must beat a stale edit from the other, whichever direction the data flows.
fn diff_snapshots(
    registry: &SchemaRegistry,
    local: &Snapshot,
    remote: &Snapshot,
    tie: TiePreference,
) -> (BTreeMap<String, TableMerge>, SyncSummary) {
    let tombstones: Vec<DeletionLogEntry> = local
        .tombstones
        .iter()
        .chain(remote.tombstones.iter())
        .cloned()
        .collect();

    let mut merges = BTreeMap::new();
    let mut summary = SyncSummary::default();

    for descriptor in registry.syncable() {
        let name = descriptor.name();
        let merge = merge_table(
            name,
            local.rows(name),
            remote.rows(name),
            &tombstones,
            tie,
        );
        summary.errors.extend(merge.errors.iter().cloned());
        summary.tables.insert(
            name.to_string(),
            TableReport {
                counts: merge.counts,
                changes: merge.changes.clone(),
            },
        );
        merges.insert(name.to_string(), merge);
    }

    (merges, summary)
}
