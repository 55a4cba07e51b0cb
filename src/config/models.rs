use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Per-operation timeouts (seconds)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_metadata_timeout")]
    pub metadata: u64,
    #[serde(default = "default_download_timeout")]
    pub download: u64,
    #[serde(default = "default_audio_conversion_timeout")]
    pub audio_conversion: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            metadata: default_metadata_timeout(),
            download: default_download_timeout(),
            audio_conversion: default_audio_conversion_timeout(),
        }
    }
}

fn default_metadata_timeout() -> u64 {
    10
}

fn default_download_timeout() -> u64 {
    300
}

fn default_audio_conversion_timeout() -> u64 {
    60
}

/// Storage and cleanup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_cookie_dir")]
    pub cookie_dir: PathBuf,
    /// Files older than this many hours are eligible for cleanup.
    #[serde(default = "default_cleanup_age")]
    pub cleanup_age: u64,
    /// Disk usage percentage above which cleanup runs.
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: u8,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cookie_dir: default_cookie_dir(),
            cleanup_age: default_cleanup_age(),
            cleanup_threshold: default_cleanup_threshold(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/app/downloads")
}

fn default_cookie_dir() -> PathBuf {
    PathBuf::from("/app/cookies")
}

fn default_cleanup_age() -> u64 {
    24
}

fn default_cleanup_threshold() -> u8 {
    80
}

fn default_max_file_size() -> u64 {
    524_288_000 // 500 MB
}

/// Download queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// TTL for completed/failed job records (hours).
    #[serde(default = "default_job_ttl_hours")]
    pub job_ttl_hours: u64,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_size: default_queue_size(),
            job_ttl_hours: default_job_ttl_hours(),
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_queue_size() -> usize {
    100
}

fn default_job_ttl_hours() -> u64 {
    24
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitingConfig {
    #[serde(default = "default_metadata_rpm")]
    pub metadata_rpm: u32,
    #[serde(default = "default_download_rpm")]
    pub download_rpm: u32,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            metadata_rpm: default_metadata_rpm(),
            download_rpm: default_download_rpm(),
            burst_capacity: default_burst_capacity(),
        }
    }
}

fn default_metadata_rpm() -> u32 {
    100
}

fn default_download_rpm() -> u32 {
    10
}

fn default_burst_capacity() -> u32 {
    20
}

/// Output template configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_output_template")]
    pub default_output: String,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_template(),
        }
    }
}

fn default_output_template() -> String {
    "%(title)s-%(id)s.%(ext)s".to_string()
}

/// Providers configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub youtube: ProviderConfig,
}

/// Per-provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub cookie_path: Option<PathBuf>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Sleep schedule (seconds) between retriable attempts.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: Vec<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            cookie_path: None,
            retry_attempts: default_retry_attempts(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> Vec<u64> {
    vec![2, 4, 8]
}

/// Extractor binary configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorConfig {
    /// Extractor binary name or path.
    #[serde(default = "default_extractor_binary")]
    pub binary: String,
    /// Media-processing binary consulted by health checks.
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    /// Scripting runtime used for challenge resolution.
    #[serde(default = "default_node_binary")]
    pub node_binary: String,
    /// Include the redacted argv in error details.
    #[serde(default)]
    pub debug_args: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: default_extractor_binary(),
            ffmpeg_binary: default_ffmpeg_binary(),
            node_binary: default_node_binary(),
            debug_args: false,
        }
    }
}

fn default_extractor_binary() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_node_binary() -> String {
    "node".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Security configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Accepted API keys. Loaded from file or environment; never logged raw.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Start with missing credentials as warnings instead of fatal errors.
    #[serde(default)]
    pub allow_degraded_start: bool,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.timeouts.metadata, 10);
        assert_eq!(config.timeouts.download, 300);
        assert_eq!(config.timeouts.audio_conversion, 60);
        assert_eq!(config.storage.cleanup_age, 24);
        assert_eq!(config.storage.cleanup_threshold, 80);
        assert_eq!(config.downloads.max_concurrent, 5);
        assert_eq!(config.downloads.queue_size, 100);
        assert_eq!(config.downloads.job_ttl_hours, 24);
        assert_eq!(config.rate_limiting.metadata_rpm, 100);
        assert_eq!(config.rate_limiting.download_rpm, 10);
        assert_eq!(config.rate_limiting.burst_capacity, 20);
        assert_eq!(config.templates.default_output, "%(title)s-%(id)s.%(ext)s");
        assert_eq!(config.providers.youtube.retry_backoff, vec![2, 4, 8]);
        assert!(config.providers.youtube.enabled);
        assert!(!config.security.allow_degraded_start);
    }
}
