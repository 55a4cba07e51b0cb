//! Availability checks for external binaries.
//!
//! Shared by the startup validator and the health endpoints: each check runs
//! the binary's version command under a timeout and reports availability plus
//! the parsed version string.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

static FFMPEG_VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ffmpeg version (\S+)").expect("ffmpeg version pattern"));

/// Minimum major version of the scripting runtime required for challenge
/// resolution.
pub const MIN_NODE_MAJOR: u32 = 20;

/// Result of a component availability check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub available: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

impl CheckResult {
    fn ok(name: &'static str, version: String) -> Self {
        Self {
            name,
            available: true,
            version: Some(version),
            error: None,
        }
    }

    fn failed(name: &'static str, error: String) -> Self {
        Self {
            name,
            available: false,
            version: None,
            error: Some(error),
        }
    }
}

async fn run_version_command(
    name: &'static str,
    binary: &str,
    arg: &str,
    limit: Duration,
) -> Result<String, CheckResult> {
    if which::which(binary).is_err() {
        return Err(CheckResult::failed(name, format!("{binary} not found")));
    }

    let child = Command::new(binary)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match timeout(limit, child).await {
        Ok(Ok(output)) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Ok(Ok(_)) => Err(CheckResult::failed(
            name,
            format!("{binary} returned non-zero exit code"),
        )),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CheckResult::failed(name, format!("{binary} not found")))
        }
        Ok(Err(e)) => Err(CheckResult::failed(name, e.to_string())),
        Err(_) => Err(CheckResult::failed(name, format!("{binary} check timed out"))),
    }
}

/// Check extractor availability and version (`<binary> --version`).
pub async fn check_extractor(binary: &str, limit: Duration) -> CheckResult {
    match run_version_command("extractor", binary, "--version", limit).await {
        Ok(stdout) => CheckResult::ok("extractor", stdout),
        Err(failed) => failed,
    }
}

/// Check media-processing binary availability (`ffmpeg -version`).
pub async fn check_ffmpeg(binary: &str, limit: Duration) -> CheckResult {
    match run_version_command("ffmpeg", binary, "-version", limit).await {
        Ok(stdout) => {
            let version = FFMPEG_VERSION_PATTERN
                .captures(&stdout)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "unknown".to_string());
            CheckResult::ok("ffmpeg", version)
        }
        Err(failed) => failed,
    }
}

/// Check scripting runtime availability and major version (`node --version`).
pub async fn check_node(binary: &str, limit: Duration) -> CheckResult {
    match run_version_command("nodejs", binary, "--version", limit).await {
        Ok(stdout) => match parse_node_major(&stdout) {
            Some(major) if major >= MIN_NODE_MAJOR => CheckResult::ok("nodejs", stdout),
            Some(_) => CheckResult {
                name: "nodejs",
                available: false,
                version: Some(stdout.clone()),
                error: Some(format!(
                    "Node.js >= {MIN_NODE_MAJOR} required, found {stdout}"
                )),
            },
            None => CheckResult {
                name: "nodejs",
                available: false,
                version: Some(stdout.clone()),
                error: Some(format!("unable to parse Node.js version: {stdout}")),
            },
        },
        Err(failed) => failed,
    }
}

fn parse_node_major(version: &str) -> Option<u32> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_stub(dir: &TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn node_major_parsing() {
        assert_eq!(parse_node_major("v20.11.1"), Some(20));
        assert_eq!(parse_node_major("v18.0.0"), Some(18));
        assert_eq!(parse_node_major("22.1.0"), Some(22));
        assert_eq!(parse_node_major("garbage"), None);
    }

    #[tokio::test]
    async fn missing_binary_reports_not_found() {
        let result = check_extractor("definitely-not-a-binary-xyz", Duration::from_secs(2)).await;
        assert!(!result.available);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn extractor_stub_version_reported() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, "fake-extractor", "echo 2024.12.01");
        let result = check_extractor(&stub, Duration::from_secs(2)).await;
        assert!(result.available);
        assert_eq!(result.version.as_deref(), Some("2024.12.01"));
    }

    #[tokio::test]
    async fn old_node_rejected() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, "fake-node", "echo v18.19.0");
        let result = check_node(&stub, Duration::from_secs(2)).await;
        assert!(!result.available);
        assert!(result.error.unwrap().contains(">= 20"));
    }

    #[tokio::test]
    async fn new_node_accepted() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, "fake-node", "echo v20.11.1");
        let result = check_node(&stub, Duration::from_secs(2)).await;
        assert!(result.available);
    }

    #[tokio::test]
    async fn ffmpeg_version_parsed_from_banner() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(
            &dir,
            "fake-ffmpeg",
            "echo 'ffmpeg version 6.1.1 Copyright (c) 2000-2023'",
        );
        let result = check_ffmpeg(&stub, Duration::from_secs(2)).await;
        assert!(result.available);
        assert_eq!(result.version.as_deref(), Some("6.1.1"));
    }
}
