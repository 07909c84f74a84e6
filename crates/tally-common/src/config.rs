//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ConfigError;

/// Overrides `data_dir`.
pub const DATA_DIR_ENV: &str = "TALLY_DATA_DIR";
/// Overrides `persistence` (`durable` or `memory`).
pub const PERSISTENCE_ENV: &str = "TALLY_PERSISTENCE";

/// Where the store keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    /// Snapshot files under `data_dir`.
    #[default]
    Durable,
    /// Nothing survives the process.
    Memory,
}

impl std::str::FromStr for Persistence {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "durable" => Ok(Persistence::Durable),
            "memory" => Ok(Persistence::Memory),
            other => Err(ConfigError::Invalid(format!("unknown persistence mode: {}", other))),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for snapshot files
    pub data_dir: PathBuf,

    /// Name of the database
    pub database_name: String,

    /// Durable or in-memory
    pub persistence: Persistence,

    /// Customers created by seeding
    pub customer_count: usize,

    /// Invoices created by seeding; also the threshold below which the
    /// store is (re)seeded
    pub invoice_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tally"),
            database_name: "test".to_string(),
            persistence: Persistence::Durable,
            customer_count: 100,
            invoice_count: 10_000,
        }
    }
}

impl StoreConfig {
    /// Default volumes, nothing written to disk.
    pub fn in_memory() -> Self {
        Self {
            persistence: Persistence::Memory,
            ..Default::default()
        }
    }

    /// Durable store rooted at `data_dir`.
    pub fn durable(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            persistence: Persistence::Durable,
            ..Default::default()
        }
    }

    /// Override seeding volumes.
    pub fn with_volumes(mut self, customers: usize, invoices: usize) -> Self {
        self.customer_count = customers;
        self.invoice_count = invoices;
        self
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TALLY_DATA_DIR` / `TALLY_PERSISTENCE`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(mode) = std::env::var(PERSISTENCE_ENV) {
            self.persistence = mode.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_name.trim().is_empty() {
            return Err(ConfigError::Invalid("database_name must not be empty".into()));
        }
        if self.customer_count == 0 {
            return Err(ConfigError::Invalid("customer_count must be at least 1".into()));
        }
        if self.invoice_count == 0 {
            return Err(ConfigError::Invalid("invoice_count must be at least 1".into()));
        }
        Ok(())
    }

    /// Snapshot directory, `None` for in-memory stores.
    pub fn storage_root(&self) -> Option<&Path> {
        match self.persistence {
            Persistence::Durable => Some(&self.data_dir),
            Persistence::Memory => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.database_name, "test");
        assert_eq!(config.customer_count, 100);
        assert_eq!(config.invoice_count, 10_000);
        assert!(config.data_dir.ends_with("tally"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_data_dir_is_platform_local() {
        let config = StoreConfig::default();
        match dirs::data_local_dir() {
            Some(base) => assert_eq!(config.data_dir, base.join("tally")),
            None => assert_eq!(config.data_dir, PathBuf::from(".").join("tally")),
        }
    }

    #[test]
    fn test_in_memory_has_no_root() {
        assert!(StoreConfig::in_memory().storage_root().is_none());
        assert!(StoreConfig::durable("/tmp/x").storage_root().is_some());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "database_name": "demo", "persistence": "memory" }}"#).unwrap();

        let config = StoreConfig::load(file.path()).unwrap();
        assert_eq!(config.database_name, "demo");
        assert_eq!(config.persistence, Persistence::Memory);
        assert_eq!(config.invoice_count, 10_000);
    }

    #[test]
    fn test_load_rejects_zero_volume() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "customer_count": 0 }}"#).unwrap();

        assert!(matches!(
            StoreConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            StoreConfig::load("/definitely/not/here.json"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_parse_persistence() {
        assert_eq!("Memory".parse::<Persistence>().unwrap(), Persistence::Memory);
        assert!("tape".parse::<Persistence>().is_err());
    }
}
