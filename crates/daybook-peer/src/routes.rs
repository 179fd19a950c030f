use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use daybook_core::{DeletionLogEntry, Snapshot, Store};

use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sync/getDesktopData", get(get_desktop_data))
        .route("/sync/deleteStaleEntries", post(delete_stale_entries))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

/// Serve this device's full snapshot, tombstones included.
///
/// An empty store answers 404 with the `notFound` body marker rather than an
/// empty snapshot, so a fresh install is distinguishable from a wiped one.
async fn get_desktop_data(State(state): State<AppState>) -> Result<Json<Snapshot>, AppError> {
    let snapshot = state.store.snapshot()?;
    if snapshot.is_empty() {
        return Err(AppError::NoData);
    }
    Ok(Json(snapshot))
}

#[derive(Debug, Serialize)]
struct DeleteStaleResponse {
    applied: usize,
    skipped: usize,
}

/// Apply the counterpart's tombstones to this device.
///
/// A tombstone only removes a row whose last edit is strictly older than the
/// deletion; anything else is counted as skipped, including rows already gone
/// and tables this device does not sync.
async fn delete_stale_entries(
    State(state): State<AppState>,
    Json(entries): Json<Vec<DeletionLogEntry>>,
) -> Result<Json<DeleteStaleResponse>, AppError> {
    let mut applied = 0;
    let mut skipped = 0;

    for entry in &entries {
        match apply_tombstone(&state.store, entry) {
            Ok(true) => applied += 1,
            Ok(false) => skipped += 1,
            Err(error) => {
                tracing::warn!(
                    table = %entry.table_name,
                    uuid = %entry.record_uuid,
                    error = %error,
                    "Failed to apply tombstone"
                );
                skipped += 1;
            }
        }
    }

    tracing::info!(applied, skipped, "Applied counterpart tombstones");
    Ok(Json(DeleteStaleResponse { applied, skipped }))
}

fn apply_tombstone(store: &Store, entry: &DeletionLogEntry) -> Result<bool, AppError> {
    let Some(descriptor) = store.registry().get(&entry.table_name) else {
        return Ok(false);
    };
    if !descriptor.is_syncable() {
        return Ok(false);
    }

    let table = store.table(&entry.table_name)?;
    let Some(row) = table.get_by_uuid(&entry.record_uuid)? else {
        return Ok(false);
    };
    // An edit stamped at or after the deletion survives it
    if row.updated_at().unwrap_or(0) >= entry.deleted_at {
        return Ok(false);
    }

    table.remove_for_sync(&entry.record_uuid)?;
    Ok(true)
}
