//! HTTP transport to the counterpart device
//!
//! Two routes make up the whole protocol: pulling the counterpart's full
//! snapshot and pushing this device's pending tombstones. Failures are
//! classified so the orchestrator and UI can distinguish "the other device is
//! off" from "the other device is running something unexpected".

use serde::Deserialize;
use thiserror::Error;

use crate::models::{DeletionLogEntry, Snapshot};

const PULL_ROUTE: &str = "/sync/getDesktopData";
const PUSH_ROUTE: &str = "/sync/deleteStaleEntries";

/// Transport failures, ordered roughly from "expected" to "alarming"
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid counterpart endpoint: {0}")]
    InvalidEndpoint(String),
    /// The counterpart is unreachable (powered off, asleep, wrong network)
    #[error("Counterpart is offline or unreachable: {0}")]
    ServerOffline(String),
    /// The counterpart answered but does not serve the sync routes
    #[error("Counterpart does not expose the sync route: {0}")]
    RouteNotFound(String),
    /// The counterpart serves the route but holds no data yet
    #[error("Counterpart has no data to sync")]
    DataNotFound,
    #[error("Unexpected counterpart response: {0}")]
    Unexpected(String),
}

/// Counts returned by the counterpart after applying pushed tombstones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PushReceipt {
    #[serde(default)]
    pub applied: usize,
    #[serde(default)]
    pub skipped: usize,
}

/// Client for the counterpart's sync routes
pub struct SyncTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl SyncTransport {
    /// Build a transport for the given counterpart base URL.
    ///
    /// The endpoint must carry an explicit http(s) scheme; a bare host is
    /// rejected up front rather than surfacing later as a connect error.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: normalize_endpoint(endpoint)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the counterpart's full snapshot
    pub async fn pull_snapshot(&self) -> Result<Snapshot, TransportError> {
        let url = format!("{}{PULL_ROUTE}", self.endpoint);
        tracing::debug!(url = %url, "Pulling counterpart snapshot");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| classify_request_error(&url, &error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| TransportError::Unexpected(error.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body, &url));
        }

        serde_json::from_str(&body).map_err(|error| {
            TransportError::Unexpected(format!("malformed snapshot body: {error}"))
        })
    }

    /// Push pending tombstones so the counterpart drops the matching rows
    pub async fn push_tombstones(
        &self,
        entries: &[DeletionLogEntry],
    ) -> Result<PushReceipt, TransportError> {
        let url = format!("{}{PUSH_ROUTE}", self.endpoint);
        tracing::debug!(url = %url, count = entries.len(), "Pushing tombstones");

        let response = self
            .client
            .post(&url)
            .json(entries)
            .send()
            .await
            .map_err(|error| classify_request_error(&url, &error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| TransportError::Unexpected(error.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body, &url));
        }

        // Older counterparts answer with an empty body; treat it as zeros
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}

/// Validate and normalize a counterpart base URL
fn normalize_endpoint(endpoint: &str) -> Result<String, TransportError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidEndpoint(
            "endpoint is empty".to_string(),
        ));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(TransportError::InvalidEndpoint(format!(
            "{trimmed:?} must start with http:// or https://"
        )));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn classify_request_error(url: &str, error: &reqwest::Error) -> TransportError {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        TransportError::ServerOffline(format!("{url}: {error}"))
    } else {
        TransportError::Unexpected(error.to_string())
    }
}

/// Map a non-success status to the error taxonomy.
///
/// A 404 is ambiguous: the counterpart's own handler answers with a JSON body
/// tagged `{"type": "notFound"}` when the route exists but no data does,
/// while a framework-level 404 for a missing route has no such body.
fn classify_status(status: u16, body: &str, url: &str) -> TransportError {
    if status == 404 {
        let tagged = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .is_some_and(|value| value.get("type").and_then(|t| t.as_str()) == Some("notFound"));
        if tagged {
            return TransportError::DataNotFound;
        }
        return TransportError::RouteNotFound(url.to_string());
    }

    let snippet: String = body.chars().take(200).collect();
    TransportError::Unexpected(format!("HTTP {status} from {url}: {snippet}"))
}
