//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! green-room matchmaking service, including file and environment variable
//! loading and validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub store: StoreSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Interval between periodic stats log lines in seconds
    pub stats_interval_seconds: u64,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Which storage backend holds rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

/// Room storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Database file path, used when backend is sqlite
    pub sqlite_path: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "green-room".to_string(),
            log_level: "info".to_string(),
            stats_interval_seconds: 60,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: "green-room.db".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(interval) = env::var("STATS_INTERVAL_SECONDS") {
            config.service.stats_interval_seconds = interval
                .parse()
                .map_err(|_| anyhow!("Invalid STATS_INTERVAL_SECONDS value: {}", interval))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Store settings
        if let Ok(backend) = env::var("STORE_BACKEND") {
            config.store.backend = match backend.to_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "sqlite" => StoreBackend::Sqlite,
                _ => return Err(anyhow!("Invalid STORE_BACKEND value: {}", backend)),
            };
        }
        if let Ok(path) = env::var("SQLITE_PATH") {
            config.store.sqlite_path = path;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file {}", path.as_ref().display())
        })?;
        let config: Self = toml::from_str(&raw).with_context(|| {
            format!("Failed to parse config file {}", path.as_ref().display())
        })?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Get stats interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.service.stats_interval_seconds)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.service.stats_interval_seconds == 0 {
        return Err(anyhow!("Stats interval must be greater than 0"));
    }

    // Validate store settings
    if config.store.backend == StoreBackend::Sqlite && config.store.sqlite_path.is_empty() {
        return Err(anyhow!("Sqlite path cannot be empty"));
    }

    Ok(())
}
