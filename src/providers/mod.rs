//! Provider bindings and URL dispatch.
//!
//! A provider binds URL patterns to a credential path and retry policy.
//! Bindings are registered at startup; a binding whose credential is missing
//! is disabled when degraded mode permits it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::extractor::RetryPolicy;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no provider available for URL: {0}")]
    NoProvider(String),
    #[error("provider '{0}' is currently disabled")]
    ProviderDisabled(String),
}

/// Static per-provider binding.
pub struct ProviderBinding {
    pub name: String,
    url_patterns: Vec<Regex>,
    video_id_pattern: Option<Regex>,
    pub cookie_path: Option<PathBuf>,
    pub max_attempts: u32,
    pub backoff_schedule: Vec<u64>,
    enabled: AtomicBool,
}

impl ProviderBinding {
    pub fn matches_url(&self, url: &str) -> bool {
        self.url_patterns.iter().any(|p| p.is_match(url))
    }

    pub fn extract_video_id(&self, url: &str) -> Option<String> {
        let pattern = self.video_id_pattern.as_ref()?;
        pattern
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn disable(&self) {
        info!(provider = %self.name, "provider disabled");
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn enable(&self) {
        info!(provider = %self.name, "provider enabled");
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, &self.backoff_schedule)
    }
}

/// Build the YouTube binding from configuration.
pub fn youtube_binding(config: &ProviderConfig) -> ProviderBinding {
    let patterns = [
        r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/watch\?v=[\w-]+",
        r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/shorts/[\w-]+",
        r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/embed/[\w-]+",
        r"(?i)^(?:https?://)?youtu\.be/[\w-]+",
        r"(?i)^(?:https?://)?m\.youtube\.com/watch\?v=[\w-]+",
    ];

    ProviderBinding {
        name: "youtube".to_string(),
        url_patterns: patterns
            .iter()
            .map(|p| Regex::new(p).expect("youtube url pattern"))
            .collect(),
        video_id_pattern: Some(
            Regex::new(r"(?:v=|shorts/|embed/|youtu\.be/)([\w-]+)").expect("video id pattern"),
        ),
        cookie_path: config.cookie_path.clone(),
        max_attempts: config.retry_attempts,
        backoff_schedule: config.retry_backoff.clone(),
        enabled: AtomicBool::new(config.enabled),
    }
}

/// Selects the provider for an incoming URL.
pub struct ProviderDispatcher {
    providers: Vec<Arc<ProviderBinding>>,
}

impl ProviderDispatcher {
    pub fn new(providers: Vec<Arc<ProviderBinding>>) -> Self {
        Self { providers }
    }

    /// First enabled binding whose pattern set matches, in registration
    /// order. A URL owned only by disabled providers reports the provider as
    /// unavailable rather than unknown.
    pub fn dispatch(&self, url: &str) -> Result<Arc<ProviderBinding>, DispatchError> {
        let mut disabled_match: Option<&str> = None;

        for provider in &self.providers {
            if !provider.matches_url(url) {
                continue;
            }
            if provider.is_enabled() {
                debug!(provider = %provider.name, url, "provider selected for URL");
                return Ok(provider.clone());
            }
            disabled_match.get_or_insert(provider.name.as_str());
        }

        match disabled_match {
            Some(name) => Err(DispatchError::ProviderDisabled(name.to_string())),
            None => Err(DispatchError::NoProvider(url.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderBinding>> {
        self.providers.iter().find(|p| p.name == name).cloned()
    }

    pub fn list(&self) -> Vec<(String, bool)> {
        self.providers
            .iter()
            .map(|p| (p.name.clone(), p.is_enabled()))
            .collect()
    }
}
