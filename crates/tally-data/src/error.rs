//! Error types for the data layer

use tally_common::ConfigError;
use tally_idb::IDBError;
use thiserror::Error;

/// Result type alias for data layer operations
pub type DataResult<T> = Result<T, DataError>;

/// Main error type for the data layer
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Store error: {0}")]
    Store(#[from] IDBError),

    #[error("Record encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not generate a {width}-character id after {attempts} attempts")]
    IdGeneration { width: usize, attempts: usize },

    #[error("Nothing to choose from: {0}")]
    EmptyCandidates(&'static str),

    #[error("Invalid date {0:?}")]
    InvalidDate(String),

    #[error("The process-wide provider is already installed")]
    ProviderInstalled,
}

impl DataError {
    /// The store error underneath, if any.
    pub fn as_store_error(&self) -> Option<&IDBError> {
        match self {
            DataError::Store(e) => Some(e),
            _ => None,
        }
    }
}
