//! Configuration management with file persistence

use crate::domain::health::HealthConfig;
use crate::domain::locking::LockConfig;
use crate::domain::resources::ResourceConfig;
use crate::domain::tasks::PoolConfig;
use crate::domain::threads::ThreadManagerConfig;
use crate::error::Error;
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Armsync configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub locking: LockingSection,
    pub workers: WorkersSection,
    pub resources: ResourcesSection,
    pub health: HealthSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingSection {
    pub default_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    pub count: usize,
    pub poll_interval_ms: u64,
    pub result_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesSection {
    pub default_timeout_ms: u64,
    pub access_record_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub warning_utilization: f64,
}

impl Default for LockingSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
        }
    }
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            count: 4,
            poll_interval_ms: 100,
            result_capacity: 1024,
        }
    }
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
            access_record_capacity: 1000,
        }
    }
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            warning_utilization: 0.8,
        }
    }
}

const KEYS: [&str; 7] = [
    "locking.default_timeout_ms",
    "workers.count",
    "workers.poll_interval_ms",
    "workers.result_capacity",
    "resources.default_timeout_ms",
    "resources.access_record_capacity",
    "health.warning_utilization",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("ARMSYNC_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("armsync")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create config directory: {}", dir.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |message: String| -> crate::Result<()> { Err(Error::Config(message)) };

        if self.workers.count == 0 {
            return invalid("workers.count must be at least 1".into());
        }
        if self.workers.poll_interval_ms == 0 {
            return invalid("workers.poll_interval_ms must be at least 1".into());
        }
        if self.workers.result_capacity == 0 {
            return invalid("workers.result_capacity must be at least 1".into());
        }
        if self.resources.default_timeout_ms == 0 {
            return invalid("resources.default_timeout_ms must be at least 1".into());
        }
        if self.resources.access_record_capacity == 0 {
            return invalid("resources.access_record_capacity must be at least 1".into());
        }
        let utilization = self.health.warning_utilization;
        if !(utilization > 0.0 && utilization <= 1.0) {
            return invalid(format!(
                "health.warning_utilization must be in (0, 1], got {}",
                utilization
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "locking.default_timeout_ms" => Ok(self.locking.default_timeout_ms.to_string()),
            "workers.count" => Ok(self.workers.count.to_string()),
            "workers.poll_interval_ms" => Ok(self.workers.poll_interval_ms.to_string()),
            "workers.result_capacity" => Ok(self.workers.result_capacity.to_string()),
            "resources.default_timeout_ms" => Ok(self.resources.default_timeout_ms.to_string()),
            "resources.access_record_capacity" => {
                Ok(self.resources.access_record_capacity.to_string())
            }
            "health.warning_utilization" => Ok(self.health.warning_utilization.to_string()),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `armsync config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// The updated configuration is validated; on error it is left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.clone();
        match key {
            "locking.default_timeout_ms" => {
                updated.locking.default_timeout_ms = parse(key, value)?;
            }
            "workers.count" => {
                updated.workers.count = parse(key, value)?;
            }
            "workers.poll_interval_ms" => {
                updated.workers.poll_interval_ms = parse(key, value)?;
            }
            "workers.result_capacity" => {
                updated.workers.result_capacity = parse(key, value)?;
            }
            "resources.default_timeout_ms" => {
                updated.resources.default_timeout_ms = parse(key, value)?;
            }
            "resources.access_record_capacity" => {
                updated.resources.access_record_capacity = parse(key, value)?;
            }
            "health.warning_utilization" => {
                updated.health.warning_utilization = parse(key, value)?;
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `armsync config list` to see available keys.",
                    key
                ));
            }
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults by removing the config file
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }

    // ========== Domain Configs ==========

    pub fn lock_config(&self) -> LockConfig {
        LockConfig::default().with_timeout(Duration::from_millis(self.locking.default_timeout_ms))
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_workers(self.workers.count)
            .with_poll_interval(Duration::from_millis(self.workers.poll_interval_ms))
            .with_result_capacity(self.workers.result_capacity)
    }

    pub fn resource_config(&self) -> ResourceConfig {
        ResourceConfig::default()
            .with_timeout(Duration::from_millis(self.resources.default_timeout_ms))
            .with_access_record_capacity(self.resources.access_record_capacity)
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            warning_utilization: self.health.warning_utilization,
            ..HealthConfig::default()
        }
    }

    pub fn thread_manager_config(&self) -> ThreadManagerConfig {
        ThreadManagerConfig {
            locking: self.lock_config(),
            pool: self.pool_config(),
            health: self.health_config(),
        }
    }
}

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.pool_config().poll_interval, Duration::from_millis(100));
        assert_eq!(config.lock_config().default_timeout, Duration::from_secs(5));
        assert_eq!(config.resource_config().access_record_capacity, 1000);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("workers.count", "8").unwrap();
        config.set("health.warning_utilization", "0.5").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.pool_config().workers, 8);
        assert_eq!(loaded.health_config().warning_utilization, 0.5);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[workers]\ncount = 2\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.workers.result_capacity, 1024);
        assert_eq!(config.locking.default_timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "[workers]\ncount = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        fs::write(&path, "not = [valid").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_set_validates() {
        let mut config = Config::default();
        assert!(config.set("workers.count", "0").is_err());
        assert!(config.set("workers.count", "many").is_err());
        assert!(config.set("health.warning_utilization", "1.5").is_err());
        assert!(config.set("resources.access_record_capacity", "0").is_err());
        assert!(config.set("resources.default_timeout_ms", "0").is_err());
        assert!(config.set("robot.ip", "10.0.0.1").is_err());
        assert_eq!(config, Config::default());

        config.set("locking.default_timeout_ms", "250").unwrap();
        assert_eq!(config.get("locking.default_timeout_ms").unwrap(), "250");
    }

    #[test]
    fn test_validation_reports_config_error() {
        let mut config = Config::default();
        config.resources.default_timeout_ms = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.code(), "E600");
        assert!(err.to_string().contains("resources.default_timeout_ms"));
    }

    #[test]
    fn test_list_covers_every_key() {
        let entries = Config::default().list().unwrap();
        assert_eq!(entries.len(), KEYS.len());
        assert!(entries.contains(&("workers.count".to_string(), "4".to_string())));
    }
}
