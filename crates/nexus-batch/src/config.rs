//! Batch writer configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding [`BatchConfig::initial_store_size`]
pub const ENV_INITIAL_STORE_SIZE: &str = "NEXUS_BATCH_INITIAL_STORE_SIZE";
/// Environment variable overriding [`BatchConfig::catalog_map_size`]
pub const ENV_CATALOG_MAP_SIZE: &str = "NEXUS_BATCH_CATALOG_MAP_SIZE";
/// Environment variable overriding [`BatchConfig::progress_interval`]
pub const ENV_PROGRESS_INTERVAL: &str = "NEXUS_BATCH_PROGRESS_INTERVAL";

/// Batch writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Bytes initially mapped for each record file
    pub initial_store_size: usize,
    /// Maximum size of the catalog's LMDB map in bytes
    pub catalog_map_size: usize,
    /// Log a progress line every N created nodes or relationships (0 disables)
    pub progress_interval: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            initial_store_size: 1024 * 1024,     // 1MB per record file
            catalog_map_size: 16 * 1024 * 1024, // 16MB
            progress_interval: 1_000_000,
        }
    }
}

impl BatchConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))?;
        tracing::info!("Loaded batch configuration from {:?}", path);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file and the environment
    ///
    /// Priority: environment variables > config file > defaults
    pub fn from_env(config_file: Option<&Path>) -> Result<Self> {
        let base = match config_file {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::debug!("Batch config file not found: {:?}", path);
                Self::default()
            }
            None => Self::default(),
        };
        base.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `NEXUS_BATCH_*` overrides looked up through `lookup`
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_INITIAL_STORE_SIZE) {
            self.initial_store_size = parse_override(ENV_INITIAL_STORE_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_CATALOG_MAP_SIZE) {
            self.catalog_map_size = parse_override(ENV_CATALOG_MAP_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_PROGRESS_INTERVAL) {
            self.progress_interval = parse_override(ENV_PROGRESS_INTERVAL, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the stores cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.initial_store_size == 0 {
            return Err(Error::config("initial_store_size must be greater than zero"));
        }
        if self.catalog_map_size == 0 {
            return Err(Error::config("catalog_map_size must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let parsed = value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("invalid {}={:?}: {}", name, value, e)))?;
    tracing::debug!("{} overridden from environment", name);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.initial_store_size, 1024 * 1024);
        assert_eq!(config.catalog_map_size, 16 * 1024 * 1024);
        assert_eq!(config.progress_interval, 1_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_keeps_missing_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.toml");
        std::fs::write(&path, "initial_store_size = 65536\n").unwrap();

        let config = BatchConfig::from_file(&path).unwrap();
        assert_eq!(config.initial_store_size, 65536);
        assert_eq!(config.catalog_map_size, BatchConfig::default().catalog_map_size);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.toml");
        std::fs::write(&path, "initial_store_size = \"big\"\n").unwrap();

        assert!(matches!(BatchConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.toml");
        std::fs::write(&path, "progress_interval = 10\ncatalog_map_size = 2048\n").unwrap();

        let config = BatchConfig::from_file(&path)
            .unwrap()
            .apply_overrides(lookup(&[(ENV_PROGRESS_INTERVAL, " 0 ")]))
            .unwrap();
        assert_eq!(config.progress_interval, 0);
        assert_eq!(config.catalog_map_size, 2048);
    }

    #[test]
    fn test_invalid_override() {
        let result = BatchConfig::default()
            .apply_overrides(lookup(&[(ENV_INITIAL_STORE_SIZE, "lots")]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result =
            BatchConfig::default().apply_overrides(lookup(&[(ENV_CATALOG_MAP_SIZE, "0")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = BatchConfig::from_env(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.initial_store_size, BatchConfig::default().initial_store_size);
    }
}
