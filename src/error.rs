//! Custom error types for pubwatch.
//!
//! This module defines the error taxonomy used throughout the ingestion pipeline.
//! All library functions return `Result<T, IngestError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for pubwatch operations.
///
/// Only [`IngestError::RateLimited`] is recovered from by the pipeline itself;
/// every other variant aborts the run before anything is committed.
/// [`IngestError::Interrupted`] is an operator abort rather than a failure.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Rate limited by the literature source
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Literature source returned a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message
        message: String,
    },

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Malformed XML document
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV output error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// A record failed boundary validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Background work panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The operator interrupted the run before it committed
    #[error("Interrupted before commit")]
    Interrupted,
}

impl IngestError {
    /// True for the transient rate-limit condition that is retried after a cooldown.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, IngestError::RateLimited(_))
    }
}

impl From<quick_xml::events::attributes::AttrError> for IngestError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        IngestError::Parse(err.to_string())
    }
}

/// Result type alias using `IngestError`
pub type Result<T> = std::result::Result<T, IngestError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a validation error message
    fn ok_or_invalid(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_invalid(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| IngestError::Validation(msg.to_string()))
    }
}
