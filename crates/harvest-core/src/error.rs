//! Error types for the capture core.

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// IO error (export/import files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HAR parse or shape error.
    #[error("HAR error: {0}")]
    Har(#[from] HarError),

    /// Filter error.
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised while decoding a HAR document.
#[derive(Debug, Error)]
pub enum HarError {
    /// The document is not valid JSON or does not match the HAR types.
    #[error("invalid HAR JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document has no `log` object.
    #[error("HAR document is missing `log`")]
    MissingLog,

    /// The `log` object has no `entries` array.
    #[error("HAR document is missing `log.entries`")]
    MissingEntries,
}

/// Errors raised when changing the active filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The pattern does not compile.
    #[error("invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The pattern could not be persisted.
    #[error("failed to persist filter: {0}")]
    Persist(#[from] KvError),
}

/// Error reported by a [`crate::KeyValueStore`] implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct KvError(pub String);

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
