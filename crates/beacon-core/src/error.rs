//! Error types for beacon.

use thiserror::Error;

/// Result type alias using beacon's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for live-query operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Snapshot loader failed (initial load or restart reload)
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Reducer failed to fold an event into the current state
    #[error("Reducer error: {0}")]
    Reducer(String),

    /// Shared counter store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (unknown query name, malformed params)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation attempted on a closed channel or query
    #[error("Closed: {0}")]
    Closed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
