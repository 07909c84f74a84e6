//! # Tally Common
//!
//! Configuration and logging shared by the Tally crates.
//!
//! ## Features
//!
//! - Store configuration loaded from JSON with environment overrides
//! - Logging configuration and setup on top of `tracing-subscriber`

use std::path::PathBuf;
use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{Persistence, StoreConfig};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`StoreConfig`].
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::Invalid("customer_count must be at least 1".into());
        assert_eq!(
            err.to_string(),
            "Invalid config: customer_count must be at least 1"
        );
    }
}
