//! Error types for Bitemporal-DB

use thiserror::Error;

/// Result type alias for Bitemporal-DB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Bitemporal-DB
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected before the store is touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// The referenced entity has no current row
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization conflict raised by the store's isolation level.
    /// Never retried internally.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid timestamp or time range
    #[error("Temporal error: {0}")]
    Temporal(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may reasonably retry the whole operation with
    /// fresh reads.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
