//! FractalDB Configuration Module
//! Handles loading and validating fractal.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "fractal.config.json";

/// Path value selecting a private in-memory database
pub const MEMORY_PATH: &str = ":memory:";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Database file, relative to the project directory, or `:memory:`
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Page size of lazy collection scans
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_pool_size() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_scan_batch_size() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/fractal.db"),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            scan_batch_size: default_scan_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Defaults with the database stored at `path`
    pub fn default_for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig {
                path: path.into(),
                ..DatabaseConfig::default()
            },
            ..Self::default()
        }
    }

    /// Defaults for a private in-memory database
    pub fn in_memory() -> Self {
        Self::default_for_path(MEMORY_PATH)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.path == Path::new(MEMORY_PATH)
    }

    /// Database path with relative paths resolved against `project_dir`
    pub fn database_path(&self, project_dir: &Path) -> PathBuf {
        if self.database.path.is_absolute() || self.is_in_memory() {
            self.database.path.clone()
        } else {
            project_dir.join(&self.database.path)
        }
    }
}
