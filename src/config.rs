//! Typed configuration, persisted as a single JSON document
//!
//! The whole file is read and written in one go. Missing keys are
//! backfilled from defaults on load, unknown keys are dropped, and the
//! stored version is pinned to the running binary's version.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::version::CURRENT_VERSION;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub theme: String,
    pub language: String,
    pub update_check: bool,
    /// URL or file path of the update manifest.
    pub update_manifest: String,
    pub monitoring: MonitoringConfig,
    pub backup: BackupConfig,
    pub cleanup: CleanupConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            theme: "light".to_string(),
            language: "en_US".to_string(),
            update_check: true,
            update_manifest: String::new(),
            monitoring: MonitoringConfig::default(),
            backup: BackupConfig::default(),
            cleanup: CleanupConfig::default(),
            logging: LoggingConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Alert thresholds in percent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub disk_threshold: f64,
    pub network_threshold: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            disk_threshold: 90.0,
            network_threshold: 80.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    pub auto_backup: bool,
    /// Hours between automatic backups.
    pub backup_interval: u64,
    pub backup_path: String,
    pub compress_backup: bool,
    /// Oldest archives beyond this count are pruned after each backup.
    pub max_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            auto_backup: true,
            backup_interval: 24,
            backup_path: String::new(),
            compress_backup: true,
            max_backups: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    pub auto_cleanup: bool,
    /// Hours between automatic cleanups (168 = weekly).
    pub cleanup_interval: u64,
    /// GB of free space below which cleanup is suggested.
    pub min_free_space: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            auto_cleanup: false,
            cleanup_interval: 168,
            min_free_space: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log file size in MB before rotation.
    pub max_size: u64,
    /// Rotated files kept around.
    pub backup_count: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            max_size: 10,
            backup_count: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub encrypt_backups: bool,
    pub encryption_key: String,
    pub verify_updates: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encrypt_backups: false,
            encryption_key: String::new(),
            verify_updates: true,
        }
    }
}

impl Config {
    /// Load from `path`, backfilling missing keys from defaults. A missing
    /// file yields the defaults and writes them out, matching first-run
    /// behavior.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        // The stored version always tracks the running binary.
        config.version = CURRENT_VERSION.to_string();
        Ok(config)
    }

    /// Write the whole document, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Load from the default location, falling back to defaults if the
    /// file is unreadable or corrupt.
    pub fn load_or_default() -> Config {
        match config_path() {
            Ok(path) => Config::load(&path).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }

    /// Update a single field addressed by a dot path such as
    /// `monitoring.cpu_threshold`. The value is parsed as JSON first so
    /// numbers and booleans keep their types; anything that fails to parse
    /// is treated as a string. Re-deserializing validates the field type.
    pub fn set_key(&mut self, key: &str, raw_value: &str) -> Result<()> {
        let mut doc = serde_json::to_value(&*self).context("Failed to serialize config")?;

        let pointer = format!("/{}", key.replace('.', "/"));
        let target = doc
            .pointer_mut(&pointer)
            .with_context(|| format!("Unknown config key: {}", key))?;

        *target = serde_json::from_str(raw_value)
            .unwrap_or_else(|_| serde_json::Value::String(raw_value.to_string()));

        *self = serde_json::from_value(doc)
            .with_context(|| format!("Invalid value for config key {}: {}", key, raw_value))?;
        Ok(())
    }
}

/// Default config file location (created on demand by `save`).
pub fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "sysmate")
        .context("Failed to determine config directory")?;
    Ok(dirs.config_dir().join("config.json"))
}

/// Directory for log files, next to the config.
pub fn log_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "sysmate")
        .context("Failed to determine config directory")?;
    Ok(dirs.config_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_is_value_equal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.theme = "dark".to_string();
        config.monitoring.cpu_threshold = 65.0;
        config.backup.max_backups = 9;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_keys_backfilled_from_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"theme": "dark", "monitoring": {"cpu_threshold": 50}}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.theme, "dark");
        assert_eq!(config.monitoring.cpu_threshold, 50.0);
        // Everything else comes from defaults.
        assert_eq!(config.monitoring.disk_threshold, 90.0);
        assert_eq!(config.backup.max_backups, 5);
        assert!(config.update_check);
    }

    #[test]
    fn test_version_pinned_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"version": "0.0.1"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.version, CURRENT_VERSION);
    }

    #[test]
    fn test_missing_file_creates_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_set_key_nested_number() {
        let mut config = Config::default();
        config.set_key("monitoring.cpu_threshold", "75").unwrap();
        assert_eq!(config.monitoring.cpu_threshold, 75.0);
    }

    #[test]
    fn test_set_key_top_level_string_and_bool() {
        let mut config = Config::default();
        config.set_key("theme", "dark").unwrap();
        assert_eq!(config.theme, "dark");
        config.set_key("update_check", "false").unwrap();
        assert!(!config.update_check);
    }

    #[test]
    fn test_set_key_unknown_key_fails() {
        let mut config = Config::default();
        assert!(config.set_key("no.such.key", "1").is_err());
    }

    #[test]
    fn test_set_key_wrong_type_fails() {
        let mut config = Config::default();
        assert!(config.set_key("backup.max_backups", "plenty").is_err());
    }
}
