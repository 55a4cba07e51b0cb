//! Per-provider credential (cookie jar) lifecycle.
//!
//! Each provider has one record tracking the cookie file's mtime and the
//! cached validation verdict. Validation results are cached for an hour;
//! file modification is observed within 60 seconds and invalidates the
//! cache. Reload is atomic from the caller's perspective: a failed reload
//! restores the previous record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::extractor::ExtractorInvoker;

/// Validation verdicts are cached this long.
pub const VALIDATION_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Cookie file mtime is re-checked at most this often.
pub const FILE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Cookie files older than this produce a readiness warning.
pub const WARNING_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

/// Known stable video used by the liveness probe ("Me at the zoo").
pub const PROBE_URL: &str = "https://www.youtube.com/watch?v=jNQXAC9IVRw";

const NETSCAPE_HEADERS: &[&str] = &["# Netscape HTTP Cookie File", "# HTTP Cookie File"];

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("provider '{0}' has no cookie configured")]
    NotConfigured(String),
    #[error("cookie file not found: {0}")]
    FileMissing(PathBuf),
    #[error("cookie file for {0} is empty")]
    Empty(String),
    #[error("invalid cookie file for {provider}: {reason}")]
    InvalidFormat { provider: String, reason: String },
    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cookie authentication probe failed: {0}")]
    ProbeFailed(String),
}

/// Validation state of a provider's cookie record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    Unchecked,
    Valid,
    Invalid,
}

/// Authentication liveness probe. The production implementation shells out to
/// the extractor; tests substitute a stub.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, cookie_path: &Path) -> Result<(), String>;
}

/// Probe backed by a simulate-only extractor call against [`PROBE_URL`].
pub struct ExtractorLivenessProbe {
    invoker: ExtractorInvoker,
    timeout: Duration,
}

impl ExtractorLivenessProbe {
    pub fn new(invoker: ExtractorInvoker, timeout: Duration) -> Self {
        Self { invoker, timeout }
    }
}

#[async_trait]
impl LivenessProbe for ExtractorLivenessProbe {
    async fn probe(&self, cookie_path: &Path) -> Result<(), String> {
        self.invoker
            .probe(PROBE_URL, Some(cookie_path), self.timeout)
            .await
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug)]
struct CookieRecord {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    state: ValidationState,
    cache_until: Option<Instant>,
    last_file_check: Option<Instant>,
}

/// Cookie status exposed through health and admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CookieStatus {
    pub exists: bool,
    pub state: ValidationState,
    pub age_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Result of a successful hot-reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadOutcome {
    pub success: bool,
    pub provider: String,
    pub message: String,
    pub age_hours: Option<f64>,
}

/// Owns all cookie records. One lock per provider serializes validate and
/// reload so concurrent validations of the same credential coalesce.
pub struct CookieStore {
    records: HashMap<String, Mutex<CookieRecord>>,
    probe: Box<dyn LivenessProbe>,
    cache_ttl: Duration,
    check_interval: Duration,
}

impl CookieStore {
    pub fn new(probe: Box<dyn LivenessProbe>) -> Self {
        Self {
            records: HashMap::new(),
            probe,
            cache_ttl: VALIDATION_CACHE_TTL,
            check_interval: FILE_CHECK_INTERVAL,
        }
    }

    /// Override cache/check intervals. Intended for tests.
    pub fn with_intervals(mut self, cache_ttl: Duration, check_interval: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self.check_interval = check_interval;
        self
    }

    /// Register a provider's cookie path. Called once at startup.
    pub fn register(&mut self, provider: impl Into<String>, path: impl Into<PathBuf>) {
        let provider = provider.into();
        let path = path.into();
        info!(provider = %provider, cookie_path = %path.display(), "cookie path registered");
        self.records.insert(
            provider,
            Mutex::new(CookieRecord {
                path,
                last_mtime: None,
                state: ValidationState::Unchecked,
                cache_until: None,
                last_file_check: None,
            }),
        );
    }

    pub fn providers(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn is_registered(&self, provider: &str) -> bool {
        self.records.contains_key(provider)
    }

    pub async fn cookie_path(&self, provider: &str) -> Option<PathBuf> {
        let record = self.records.get(provider)?;
        Some(record.lock().await.path.clone())
    }

    /// Seconds since the cookie file's mtime.
    pub async fn age(&self, provider: &str) -> Option<Duration> {
        let path = self.cookie_path(provider).await?;
        let mtime = std::fs::metadata(path).ok()?.modified().ok()?;
        SystemTime::now().duration_since(mtime).ok()
    }

    pub async fn age_hours(&self, provider: &str) -> Option<f64> {
        self.age(provider).await.map(|d| d.as_secs_f64() / 3600.0)
    }

    /// Warning string when the cookie file has outlived [`WARNING_AGE`].
    pub async fn age_warning(&self, provider: &str) -> Option<String> {
        let age = self.age(provider).await?;
        if age >= WARNING_AGE {
            let days = age.as_secs() / 86400;
            warn!(provider, age_days = days, "cookie file is old");
            Some(format!(
                "Cookie file for {provider} is {days} days old. \
                 Consider refreshing cookies if authentication issues occur."
            ))
        } else {
            None
        }
    }

    /// Validate a provider's cookie, serving from the 1-hour cache when the
    /// file is unchanged. An mtime change is observed within the check
    /// interval and forces re-validation.
    pub async fn validate(&self, provider: &str) -> Result<(), CookieError> {
        let record = self
            .records
            .get(provider)
            .ok_or_else(|| CookieError::NotConfigured(provider.to_string()))?;
        let mut record = record.lock().await;
        self.validate_locked(provider, &mut record, false).await
    }

    /// Atomically re-read and validate the credential. On failure the prior
    /// record (verdict, cache window and mtime) is restored.
    pub async fn reload(&self, provider: &str) -> Result<ReloadOutcome, CookieError> {
        let record = self
            .records
            .get(provider)
            .ok_or_else(|| CookieError::NotConfigured(provider.to_string()))?;
        let mut record = record.lock().await;

        info!(provider, "cookie reload started");
        let previous = (
            record.state,
            record.cache_until,
            record.last_mtime,
            record.last_file_check,
        );

        match self.validate_locked(provider, &mut record, true).await {
            Ok(()) => {
                info!(provider, "cookie reload successful");
                drop(record);
                Ok(ReloadOutcome {
                    success: true,
                    provider: provider.to_string(),
                    message: format!("Cookie for {provider} reloaded and validated successfully"),
                    age_hours: self.age_hours(provider).await,
                })
            }
            Err(error) => {
                warn!(provider, error = %error, "cookie reload failed, rolling back");
                (
                    record.state,
                    record.cache_until,
                    record.last_mtime,
                    record.last_file_check,
                ) = previous;
                Err(error)
            }
        }
    }

    async fn validate_locked(
        &self,
        provider: &str,
        record: &mut CookieRecord,
        force: bool,
    ) -> Result<(), CookieError> {
        let now = Instant::now();

        let due_for_check = force
            || record
                .last_file_check
                .map_or(true, |last| now.duration_since(last) >= self.check_interval);

        if due_for_check {
            record.last_file_check = Some(now);
            let mtime = std::fs::metadata(&record.path)
                .and_then(|m| m.modified())
                .ok();
            if mtime != record.last_mtime {
                debug!(provider, "cookie file modification detected");
                record.last_mtime = mtime;
                record.state = ValidationState::Unchecked;
                record.cache_until = None;
            }
        }

        if !force
            && record.state == ValidationState::Valid
            && record.cache_until.is_some_and(|until| until > now)
        {
            debug!(provider, "cookie validation served from cache");
            return Ok(());
        }

        info!(provider, "performing full cookie validation");

        if let Err(error) = check_cookie_file(provider, &record.path) {
            record.state = ValidationState::Invalid;
            record.cache_until = None;
            return Err(error);
        }

        if let Err(reason) = self.probe.probe(&record.path).await {
            record.state = ValidationState::Invalid;
            record.cache_until = None;
            return Err(CookieError::ProbeFailed(reason));
        }

        record.state = ValidationState::Valid;
        record.cache_until = Some(now + self.cache_ttl);
        info!(provider, "cookie validation complete");
        Ok(())
    }

    /// Cookie status for every registered provider, for health reporting.
    pub async fn status(&self) -> HashMap<String, CookieStatus> {
        let mut out = HashMap::new();
        for (provider, record) in &self.records {
            let record = record.lock().await;
            let exists = record.path.exists();
            let state = record.state;
            drop(record);
            out.insert(
                provider.clone(),
                CookieStatus {
                    exists,
                    state,
                    age_hours: self.age_hours(provider).await,
                    warning: self.age_warning(provider).await,
                },
            );
        }
        out
    }
}

/// Verify the credential jar: file present, non-empty, expected header on the
/// first non-blank line, and at least one 7-field entry.
pub fn check_cookie_file(provider: &str, path: &Path) -> Result<usize, CookieError> {
    if !path.exists() {
        return Err(CookieError::FileMissing(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    check_cookie_content(provider, &content)
}

fn check_cookie_content(provider: &str, content: &str) -> Result<usize, CookieError> {
    if content.trim().is_empty() {
        return Err(CookieError::Empty(provider.to_string()));
    }

    let first_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");
    if !NETSCAPE_HEADERS.iter().any(|h| first_line.starts_with(h)) {
        return Err(CookieError::InvalidFormat {
            provider: provider.to_string(),
            reason: "missing Netscape cookie file header".to_string(),
        });
    }

    let mut valid_entries = 0;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line.split('\t').count();
        if fields != 7 {
            return Err(CookieError::InvalidFormat {
                provider: provider.to_string(),
                reason: format!("expected 7 tab-separated fields, got {fields}"),
            });
        }
        valid_entries += 1;
    }

    if valid_entries == 0 {
        return Err(CookieError::InvalidFormat {
            provider: provider.to_string(),
            reason: "no valid cookie entries found".to_string(),
        });
    }

    Ok(valid_entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const VALID_JAR: &str = "# Netscape HTTP Cookie File\n\
        .youtube.com\tTRUE\t/\tTRUE\t1999999999\tSID\tabc\n\
        .youtube.com\tTRUE\t/\tTRUE\t1999999999\tHSID\tdef\n";

    struct StubProbe {
        calls: Arc<AtomicU32>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl LivenessProbe for StubProbe {
        async fn probe(&self, _cookie_path: &Path) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err("authentication failed".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn store_with_stub(
        dir: &TempDir,
    ) -> (CookieStore, Arc<AtomicU32>, Arc<AtomicBool>, PathBuf) {
        let calls = Arc::new(AtomicU32::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let path = dir.path().join("youtube.txt");
        std::fs::write(&path, VALID_JAR).unwrap();

        let mut store = CookieStore::new(Box::new(StubProbe {
            calls: calls.clone(),
            fail: fail.clone(),
        }))
        // Zero check interval so every validate looks at the file.
        .with_intervals(VALIDATION_CACHE_TTL, Duration::ZERO);
        store.register("youtube", &path);
        (store, calls, fail, path)
    }

    #[test]
    fn netscape_format_accepted() {
        assert_eq!(check_cookie_content("youtube", VALID_JAR).unwrap(), 2);
    }

    #[test]
    fn missing_header_rejected() {
        let jar = ".youtube.com\tTRUE\t/\tTRUE\t1999999999\tSID\tabc\n";
        assert!(matches!(
            check_cookie_content("youtube", jar),
            Err(CookieError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn wrong_field_count_rejected() {
        let jar = "# Netscape HTTP Cookie File\nbad entry with spaces\n";
        assert!(matches!(
            check_cookie_content("youtube", jar),
            Err(CookieError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn empty_file_rejected() {
        assert!(matches!(
            check_cookie_content("youtube", "  \n "),
            Err(CookieError::Empty(_))
        ));
    }

    #[test]
    fn header_only_rejected() {
        assert!(matches!(
            check_cookie_content("youtube", "# Netscape HTTP Cookie File\n"),
            Err(CookieError::InvalidFormat { .. })
        ));
    }

    #[tokio::test]
    async fn validation_result_is_cached() {
        let dir = TempDir::new().unwrap();
        let (store, calls, _fail, _path) = store_with_stub(&dir);

        store.validate("youtube").await.unwrap();
        store.validate("youtube").await.unwrap();
        store.validate("youtube").await.unwrap();

        // One probe; the rest served from the 1-hour cache.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mtime_change_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let (store, calls, _fail, path) = store_with_stub(&dir);

        store.validate("youtube").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Rewrite the jar with a different mtime.
        std::fs::write(&path, VALID_JAR).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();

        store.validate("youtube").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn probe_failure_marks_invalid_and_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let (store, calls, fail, _path) = store_with_stub(&dir);
        fail.store(true, Ordering::SeqCst);

        assert!(matches!(
            store.validate("youtube").await,
            Err(CookieError::ProbeFailed(_))
        ));
        assert!(matches!(
            store.validate("youtube").await,
            Err(CookieError::ProbeFailed(_))
        ));
        // Failures are re-probed every time.
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let status = store.status().await;
        assert_eq!(status["youtube"].state, ValidationState::Invalid);
    }

    #[tokio::test]
    async fn failed_reload_restores_previous_record() {
        let dir = TempDir::new().unwrap();
        let (store, calls, fail, _path) = store_with_stub(&dir);

        // Establish a valid cached verdict.
        store.validate("youtube").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Reload against a failing probe must roll back.
        fail.store(true, Ordering::SeqCst);
        assert!(store.reload("youtube").await.is_err());

        // The previous valid verdict still serves from cache: no new probe.
        fail.store(false, Ordering::SeqCst);
        store.validate("youtube").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let status = store.status().await;
        assert_eq!(status["youtube"].state, ValidationState::Valid);
    }

    #[tokio::test]
    async fn successful_reload_reports_age() {
        let dir = TempDir::new().unwrap();
        let (store, _calls, _fail, _path) = store_with_stub(&dir);

        let outcome = store.reload("youtube").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.provider, "youtube");
        assert!(outcome.age_hours.is_some());
    }

    #[tokio::test]
    async fn unknown_provider_not_configured() {
        let dir = TempDir::new().unwrap();
        let (store, _calls, _fail, _path) = store_with_stub(&dir);
        assert!(matches!(
            store.validate("vimeo").await,
            Err(CookieError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_reported() {
        let calls = Arc::new(AtomicU32::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let mut store = CookieStore::new(Box::new(StubProbe {
            calls,
            fail,
        }));
        store.register("youtube", "/nonexistent/youtube.txt");
        assert!(matches!(
            store.validate("youtube").await,
            Err(CookieError::FileMissing(_))
        ));
    }
}
