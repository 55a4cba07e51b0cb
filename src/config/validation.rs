use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("at least one API key must be configured (or security.allow_degraded_start enabled)")]
    NoApiKeys,
    #[error("storage.cleanup_threshold must be between 0 and 100, got {0}")]
    InvalidCleanupThreshold(u8),
    #[error("downloads.max_concurrent must be at least 1")]
    ZeroConcurrency,
    #[error("downloads.queue_size must be at least 1")]
    ZeroQueueSize,
    #[error("logging.level must be one of trace, debug, info, warn, error; got '{0}'")]
    InvalidLogLevel(String),
    #[error("logging.format must be 'json' or 'text', got '{0}'")]
    InvalidLogFormat(String),
    #[error("providers.youtube.retry_backoff must not be empty")]
    EmptyBackoffSchedule,
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.security.api_keys.is_empty() && !config.security.allow_degraded_start {
        return Err(ValidationError::NoApiKeys);
    }

    if config.storage.cleanup_threshold > 100 {
        return Err(ValidationError::InvalidCleanupThreshold(
            config.storage.cleanup_threshold,
        ));
    }

    if config.downloads.max_concurrent == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }

    if config.downloads.queue_size == 0 {
        return Err(ValidationError::ZeroQueueSize);
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        return Err(ValidationError::InvalidLogLevel(config.logging.level.clone()));
    }

    let format = config.logging.format.to_ascii_lowercase();
    if !["json", "text"].contains(&format.as_str()) {
        return Err(ValidationError::InvalidLogFormat(
            config.logging.format.clone(),
        ));
    }

    if config.providers.youtube.enabled && config.providers.youtube.retry_backoff.is_empty() {
        return Err(ValidationError::EmptyBackoffSchedule);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> Config {
        let mut config = Config::default();
        config.security.api_keys = vec!["test-key".to_string()];
        config
    }

    #[test]
    fn default_config_with_key_is_valid() {
        assert!(validate(&config_with_key()).is_ok());
    }

    #[test]
    fn rejects_missing_api_keys() {
        let config = Config::default();
        assert!(matches!(validate(&config), Err(ValidationError::NoApiKeys)));
    }

    #[test]
    fn degraded_start_permits_missing_keys() {
        let mut config = Config::default();
        config.security.allow_degraded_start = true;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = config_with_key();
        config.downloads.max_concurrent = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroConcurrency)
        ));
    }

    #[test]
    fn rejects_bad_log_settings() {
        let mut config = config_with_key();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLogLevel(_))
        ));

        let mut config = config_with_key();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn rejects_empty_backoff_for_enabled_provider() {
        let mut config = config_with_key();
        config.providers.youtube.retry_backoff.clear();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyBackoffSchedule)
        ));
    }
}
