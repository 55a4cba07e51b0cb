//! Component health aggregation for the health/readiness endpoints.
//!
//! Each probe runs concurrently under its own timeout so the aggregate
//! completes within the 2-second budget. Readiness distinguishes "can accept
//! traffic" from plain liveness.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::checks::{check_extractor, check_ffmpeg, check_node, CheckResult};
use crate::config::ExtractorConfig;
use crate::cookies::CookieStore;
use crate::extractor::ExtractorInvoker;
use crate::storage::StorageManager;

/// Per-probe timeout. The aggregate runs probes concurrently, so the overall
/// health check stays within the same bound.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Stable URL used for the external connectivity probe.
const CONNECTIVITY_URL: &str = "https://www.youtube.com/watch?v=jNQXAC9IVRw";

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: "healthy",
            version: None,
            details: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: "unhealthy",
            version: None,
            details: Some(json!({ "error": error.into() })),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }

    fn from_check(check: &CheckResult) -> Self {
        if check.available {
            Self {
                status: "healthy",
                version: check.version.clone(),
                details: None,
            }
        } else {
            Self {
                status: "unhealthy",
                version: check.version.clone(),
                details: Some(json!({
                    "error": check.error.clone().unwrap_or_else(|| "unavailable".to_string())
                })),
            }
        }
    }
}

/// Aggregated component statuses.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Everything the probe needs to observe.
pub struct HealthProber {
    pub extractor_config: ExtractorConfig,
    pub invoker: Arc<ExtractorInvoker>,
    pub storage: Arc<StorageManager>,
    pub cookies: Arc<CookieStore>,
}

impl HealthProber {
    /// Full component sweep: binaries, credential records, disk and external
    /// connectivity.
    pub async fn check_all(&self) -> HealthReport {
        let (extractor, ffmpeg, nodejs, connectivity) = tokio::join!(
            check_extractor(&self.extractor_config.binary, PROBE_TIMEOUT),
            check_ffmpeg(&self.extractor_config.ffmpeg_binary, PROBE_TIMEOUT),
            check_node(&self.extractor_config.node_binary, PROBE_TIMEOUT),
            self.check_connectivity(),
        );

        let mut components = BTreeMap::new();
        components.insert("extractor".to_string(), ComponentHealth::from_check(&extractor));
        components.insert("ffmpeg".to_string(), ComponentHealth::from_check(&ffmpeg));
        components.insert("nodejs".to_string(), ComponentHealth::from_check(&nodejs));
        components.insert("storage".to_string(), self.check_storage());
        components.insert("cookies".to_string(), self.check_cookies().await);
        components.insert("connectivity".to_string(), connectivity);

        let healthy = components.values().all(ComponentHealth::is_healthy);
        info!(
            status = if healthy { "healthy" } else { "unhealthy" },
            "health_check_completed"
        );

        HealthReport { healthy, components }
    }

    /// Narrow readiness sweep: extractor present and storage writable.
    pub async fn check_ready(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        let extractor = check_extractor(&self.extractor_config.binary, PROBE_TIMEOUT).await;
        if !extractor.available {
            issues.push("extractor not available".to_string());
        }

        if !self.check_storage().is_healthy() {
            issues.push("storage not ready".to_string());
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }

    fn check_storage(&self) -> ComponentHealth {
        match self.storage.disk_usage() {
            Ok(usage) => ComponentHealth {
                status: "healthy",
                version: None,
                details: Some(json!({
                    "available_gb": (usage.available as f64 / 1_073_741_824.0 * 100.0).round() / 100.0,
                    "used_percent": (usage.percent_used * 10.0).round() / 10.0,
                })),
            },
            Err(error) => ComponentHealth::unhealthy(error.to_string()),
        }
    }

    async fn check_cookies(&self) -> ComponentHealth {
        let statuses = self.cookies.status().await;
        if statuses.is_empty() {
            return ComponentHealth::unhealthy("no cookie files configured");
        }

        let any_present = statuses.values().any(|s| s.exists);
        let details = serde_json::to_value(&statuses).unwrap_or_default();

        if any_present {
            ComponentHealth {
                status: "healthy",
                version: None,
                details: Some(details),
            }
        } else {
            ComponentHealth {
                status: "unhealthy",
                version: None,
                details: Some(json!({
                    "error": "no valid cookie files found",
                    "providers": details,
                })),
            }
        }
    }

    async fn check_connectivity(&self) -> ComponentHealth {
        let started = std::time::Instant::now();
        match self
            .invoker
            .probe(CONNECTIVITY_URL, None, PROBE_TIMEOUT)
            .await
        {
            Ok(()) => ComponentHealth {
                status: "healthy",
                version: None,
                details: Some(json!({ "latency_ms": started.elapsed().as_millis() as u64 })),
            },
            Err(error) => ComponentHealth::unhealthy(format!("connectivity probe failed: {error}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::cookies::LivenessProbe;
    use async_trait::async_trait;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoopProbe;

    #[async_trait]
    impl LivenessProbe for NoopProbe {
        async fn probe(&self, _cookie_path: &Path) -> Result<(), String> {
            Ok(())
        }
    }

    fn write_stub(dir: &TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn prober(dir: &TempDir, out: &TempDir, with_cookie: bool) -> HealthProber {
        // One stub serves as extractor, ffmpeg and node at once.
        let stub = write_stub(
            dir,
            "all-in-one",
            "case \"$1\" in --version) echo 2024.12.01;; -version) echo 'ffmpeg version 6.1';; *) echo v20.9.0;; esac",
        );
        let config = ExtractorConfig {
            binary: stub.clone(),
            ffmpeg_binary: stub.clone(),
            node_binary: stub.clone(),
            debug_args: false,
        };
        let storage_config = StorageConfig {
            output_dir: out.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let mut cookies = CookieStore::new(Box::new(NoopProbe));
        if with_cookie {
            let jar = dir.path().join("youtube.txt");
            std::fs::write(
                &jar,
                "# Netscape HTTP Cookie File\n.y.com\tTRUE\t/\tTRUE\t1\tSID\tx\n",
            )
            .unwrap();
            cookies.register("youtube", jar);
        }
        HealthProber {
            invoker: Arc::new(ExtractorInvoker::new(stub, "node")),
            extractor_config: config,
            storage: Arc::new(StorageManager::new(&storage_config)),
            cookies: Arc::new(cookies),
        }
    }

    #[tokio::test]
    async fn all_components_healthy() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let report = prober(&dir, &out, true).check_all().await;
        assert!(report.healthy, "components: {:?}", report.components);
        assert!(report.components.contains_key("extractor"));
        assert!(report.components.contains_key("connectivity"));
        assert_eq!(
            report.components["extractor"].version.as_deref(),
            Some("2024.12.01")
        );
    }

    #[tokio::test]
    async fn missing_cookies_degrade_health() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let report = prober(&dir, &out, false).check_all().await;
        assert!(!report.healthy);
        assert!(!report.components["cookies"].is_healthy());
    }

    #[tokio::test]
    async fn readiness_passes_with_extractor_and_storage() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        assert!(prober(&dir, &out, true).check_ready().await.is_ok());
    }

    #[tokio::test]
    async fn readiness_fails_without_extractor() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let mut prober = prober(&dir, &out, true);
        prober.extractor_config.binary = "definitely-not-a-binary-xyz".to_string();
        let issues = prober.check_ready().await.unwrap_err();
        assert!(issues.iter().any(|i| i.contains("extractor")));
    }
}
