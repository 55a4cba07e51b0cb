//! Configuration management for vidgate
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `APP__<section>__<key>`
//!
//! Examples:
//! - `APP__SERVER__PORT=9000`
//! - `APP__RATE_LIMITING__METADATA_RPM=50`
//! - `APP__SECURITY__API_KEYS=key1,key2`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/vidgate.toml`.
//! This can be overridden using the `APP_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    Config, DownloadsConfig, ExtractorConfig, LoggingConfig, MonitoringConfig, ProviderConfig,
    ProvidersConfig, RateLimitingConfig, SecurityConfig, ServerConfig, StorageConfig,
    TemplatesConfig, TimeoutsConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation
    /// fails (no API keys, out-of-range thresholds, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
