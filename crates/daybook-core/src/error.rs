//! Error types for daybook-core

use thiserror::Error;

use crate::schema::SchemaError;

/// Result type alias using daybook-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in daybook-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema descriptor error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Record failed descriptor validation
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
