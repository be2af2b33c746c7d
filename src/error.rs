//! Error types for the aggregation engine

use thiserror::Error;

/// Result type for aggregation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregation engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error (stored records)
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Cache codec error (JSON payloads)
    #[error("Cache codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or invalid input to a query or command
    #[error("Validation error: {0}")]
    Validation(String),

    /// No data matches the query's filters
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transactional commit exhausted its retry budget
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected failure in a scheduled job
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// True for errors the caller should surface rather than retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::NotFound(_))
    }
}
