//! Startup validation.
//!
//! Runs the component checks once at boot with stricter semantics than the
//! health endpoint: any failure aborts startup unless degraded mode is
//! enabled, in which case failures downgrade to warnings and the offending
//! provider is disabled. The outcome seeds the first readiness snapshot.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::checks::{check_extractor, check_ffmpeg, check_node, CheckResult};
use crate::config::Config;
use crate::cookies::check_cookie_file;
use crate::health::PROBE_TIMEOUT;
use crate::storage::StorageManager;

/// Components that must pass even in degraded mode.
const ALWAYS_CRITICAL: &[&str] = &["extractor", "storage"];

#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub name: &'static str,
    pub passed: bool,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentCheck {
    fn from_check(check: CheckResult, critical: bool) -> Self {
        Self {
            name: check.name,
            passed: check.available,
            critical,
            version: check.version,
            message: check.error,
        }
    }
}

/// Outcome of full startup validation.
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub success: bool,
    pub degraded_mode: bool,
    pub checks: Vec<ComponentCheck>,
    pub disabled_providers: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate all external dependencies and local resources at boot.
pub async fn validate_all(config: &Config, storage: &StorageManager) -> StartupReport {
    let allow_degraded = config.security.allow_degraded_start;
    info!(allow_degraded_start = allow_degraded, "startup_validation_started");

    let mut checks = Vec::new();
    let mut disabled_providers = Vec::new();

    let extractor = check_extractor(&config.extractor.binary, PROBE_TIMEOUT).await;
    checks.push(ComponentCheck::from_check(extractor, true));

    let ffmpeg = check_ffmpeg(&config.extractor.ffmpeg_binary, PROBE_TIMEOUT).await;
    checks.push(ComponentCheck::from_check(ffmpeg, true));

    let node = check_node(&config.extractor.node_binary, PROBE_TIMEOUT).await;
    checks.push(ComponentCheck::from_check(node, true));

    checks.push(check_storage(storage));
    checks.push(check_cookies(config, allow_degraded, &mut disabled_providers));

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let critical_failures: Vec<&ComponentCheck> =
        checks.iter().filter(|c| !c.passed && c.critical).collect();
    let non_critical_failures: Vec<&ComponentCheck> =
        checks.iter().filter(|c| !c.passed && !c.critical).collect();

    let (success, degraded_mode) = if critical_failures.is_empty() {
        (true, !non_critical_failures.is_empty() && allow_degraded)
    } else if allow_degraded {
        let truly_critical: Vec<&&ComponentCheck> = critical_failures
            .iter()
            .filter(|c| ALWAYS_CRITICAL.contains(&c.name))
            .collect();
        if truly_critical.is_empty() {
            for check in &critical_failures {
                warnings.push(describe(check));
            }
            (true, true)
        } else {
            for check in &truly_critical {
                errors.push(describe(check));
            }
            (false, false)
        }
    } else {
        for check in &critical_failures {
            errors.push(describe(check));
        }
        (false, false)
    };

    for check in &non_critical_failures {
        warnings.push(describe(check));
    }

    let report = StartupReport {
        success,
        degraded_mode,
        checks,
        disabled_providers,
        errors,
        warnings,
    };

    if report.success {
        info!(
            degraded_mode = report.degraded_mode,
            disabled_providers = ?report.disabled_providers,
            warning_count = report.warnings.len(),
            "startup_validation_completed"
        );
    } else {
        error!(errors = ?report.errors, "startup_validation_failed");
    }

    report
}

fn describe(check: &ComponentCheck) -> String {
    format!(
        "{}: {}",
        check.name,
        check.message.as_deref().unwrap_or("check failed")
    )
}

fn check_storage(storage: &StorageManager) -> ComponentCheck {
    match storage.initialize() {
        Ok(()) => ComponentCheck {
            name: "storage",
            passed: true,
            critical: true,
            version: None,
            message: None,
        },
        Err(error) => ComponentCheck {
            name: "storage",
            passed: false,
            critical: true,
            version: None,
            message: Some(error.to_string()),
        },
    }
}

fn check_cookies(
    config: &Config,
    allow_degraded: bool,
    disabled_providers: &mut Vec<String>,
) -> ComponentCheck {
    let provider = &config.providers.youtube;

    if !provider.enabled {
        return ComponentCheck {
            name: "cookies",
            passed: true,
            critical: false,
            version: None,
            message: Some("youtube provider is disabled, no cookie check needed".to_string()),
        };
    }

    let failure = |message: String, disabled: &mut Vec<String>| {
        if allow_degraded {
            warn!(provider = "youtube", message = %message, "cookie check failed, disabling provider");
            disabled.push("youtube".to_string());
        }
        ComponentCheck {
            name: "cookies",
            passed: false,
            critical: !allow_degraded,
            version: None,
            message: Some(message),
        }
    };

    let Some(cookie_path) = provider.cookie_path.as_deref() else {
        return failure(
            "no cookie path configured for youtube".to_string(),
            disabled_providers,
        );
    };

    match check_cookie_file("youtube", cookie_path) {
        Ok(entries) => {
            info!(
                cookie_path = %cookie_path.display(),
                valid_entries = entries,
                "cookies_check_passed"
            );
            ComponentCheck {
                name: "cookies",
                passed: true,
                critical: false,
                version: None,
                message: None,
            }
        }
        Err(error) => failure(error.to_string(), disabled_providers),
    }
}
