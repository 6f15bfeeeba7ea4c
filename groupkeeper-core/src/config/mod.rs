//! Configuration management for groupkeeper
//!
//! Defaults, environment overrides, TOML files and validation for the
//! reconciliation core.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::logging::LogLevel;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reconciliation pass tuning
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Reconciliation pass tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Upper bound on concurrently running join attempts
    pub max_concurrent_joins: usize,

    /// Upper bound on concurrently running group registrations
    pub max_concurrent_registrations: usize,

    /// Deadline for a single establishment check
    #[serde(with = "humantime_serde")]
    pub establishment_check_timeout: Duration,

    /// Deadline for a single external commit join
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,

    /// Add the user's other devices right after bootstrapping a group
    pub expand_after_bootstrap: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrent_joins: 8,
            max_concurrent_registrations: 4,
            establishment_check_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(30),
            expand_after_bootstrap: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn env_parsed<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidEnv { key, reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

fn env_duration(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv { key, reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: GROUPKEEPER_<SECTION>_<KEY>
    /// Example: GROUPKEEPER_RECONCILE_JOIN_TIMEOUT=45s
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Reconcile config
        if let Some(n) = env_parsed("GROUPKEEPER_RECONCILE_MAX_CONCURRENT_JOINS")? {
            config.reconcile.max_concurrent_joins = n;
        }
        if let Some(n) = env_parsed("GROUPKEEPER_RECONCILE_MAX_CONCURRENT_REGISTRATIONS")? {
            config.reconcile.max_concurrent_registrations = n;
        }
        if let Some(d) = env_duration("GROUPKEEPER_RECONCILE_ESTABLISHMENT_CHECK_TIMEOUT")? {
            config.reconcile.establishment_check_timeout = d;
        }
        if let Some(d) = env_duration("GROUPKEEPER_RECONCILE_JOIN_TIMEOUT")? {
            config.reconcile.join_timeout = d;
        }
        if let Some(flag) = env_parsed("GROUPKEEPER_RECONCILE_EXPAND_AFTER_BOOTSTRAP")? {
            config.reconcile.expand_after_bootstrap = flag;
        }

        // Logging config
        if let Ok(level) = env::var("GROUPKEEPER_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = env_parsed("GROUPKEEPER_LOG_JSON")? {
            config.logging.json_format = json;
        }

        // Metrics config
        if let Some(enabled) = env_parsed("GROUPKEEPER_METRICS_ENABLED")? {
            config.metrics.enabled = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile.max_concurrent_joins == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_joins must be greater than 0".to_string(),
            ));
        }

        if self.reconcile.max_concurrent_registrations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_registrations must be greater than 0".to_string(),
            ));
        }

        if self.reconcile.establishment_check_timeout.is_zero()
            || self.reconcile.join_timeout.is_zero()
        {
            return Err(ConfigError::ValidationFailed(
                "engine call timeouts must be non-zero".to_string(),
            ));
        }

        self.logging
            .level
            .parse::<LogLevel>()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
