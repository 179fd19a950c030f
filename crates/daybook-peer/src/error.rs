use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The route exists but this device holds no data yet. Answered as a 404
    /// whose body carries a `type` marker so the counterpart can tell it
    /// apart from a missing route.
    #[error("No data available")]
    NoData,
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct NoDataBody {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl From<daybook_core::Error> for AppError {
    fn from(error: daybook_core::Error) -> Self {
        Self::Internal(error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::NoData => (StatusCode::NOT_FOUND, Json(NoDataBody { kind: "notFound" }))
                .into_response(),
            Self::Internal(_) => {
                let body = ErrorBody {
                    error: self.to_string(),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
