//! Error types for usage ingestion and pricing.

use thiserror::Error;

/// Usage tracking errors.
///
/// Most of these never leave the crate: per-line and per-file failures are
/// logged and skipped, pricing failures fall back to the cache or the bundled
/// rates. The store and [`UsageError::PricingUnavailable`] are the exceptions.
#[derive(Error, Debug)]
pub enum UsageError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (file reading)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid log line format
    #[error("invalid log line format: {0}")]
    InvalidLogFormat(String),

    /// Price list could not be fetched or decoded
    #[error("pricing fetch failed: {0}")]
    PricingFetch(String),

    /// A cost was requested before any pricing (network, cache or bundled) existed
    #[error("no pricing data has been established")]
    PricingUnavailable,

    /// Migration error
    #[error("migration error: {0}")]
    Migration(String),

    /// Background task failure
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl UsageError {
    /// Whether the failure is confined to a single log line.
    pub fn is_per_record(&self) -> bool {
        matches!(self, UsageError::InvalidLogFormat(_) | UsageError::Json(_))
    }

    /// Whether the database was busy or locked by another connection.
    pub fn is_database_locked(&self) -> bool {
        match self {
            UsageError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
            }
            _ => false,
        }
    }
}

/// Result type for usage operations.
pub type Result<T> = std::result::Result<T, UsageError>;
