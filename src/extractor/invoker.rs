//! Extractor subprocess invocation.
//!
//! Arguments are always constructed as a vector, never a shell string. The
//! child runs with stdin closed and stdout/stderr captured; the argv is
//! logged only in redacted form. Exactly one invocation exists per accepted
//! operation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::media::RawVideoInfo;
use crate::redact::redact_args;
use crate::validation::AudioFormat;

/// Grace between SIGTERM and SIGKILL when a timed-out child is reaped.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Bytes of stderr included in debug logs.
const STDERR_PREVIEW_BYTES: usize = 500;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("extractor binary is not installed or not in PATH")]
    BinaryMissing,
    #[error("extractor exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to parse extractor output: {0}")]
    OutputParse(String),
    #[error("failed to spawn extractor: {0}")]
    Spawn(std::io::Error),
    #[error("extractor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters for one download invocation. The output path has already been
/// rendered and validated by the template pipeline.
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    pub url: String,
    pub cookie_path: Option<PathBuf>,
    pub format_id: Option<String>,
    pub output_path: PathBuf,
    pub extract_audio: bool,
    pub audio_format: Option<AudioFormat>,
    /// Client-requested bitrate, recorded on the job only; the argv always
    /// asks the extractor for its best quality.
    pub audio_quality: Option<String>,
    pub include_subtitles: bool,
    pub subtitle_lang: Option<String>,
}

/// Result of a successful download invocation.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub file_path: PathBuf,
}

struct ExecOutput {
    stdout: String,
}

/// Builds argument vectors and executes the extractor binary.
#[derive(Debug, Clone)]
pub struct ExtractorInvoker {
    binary: String,
    node_binary: String,
}

impl ExtractorInvoker {
    pub fn new(binary: impl Into<String>, node_binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            node_binary: node_binary.into(),
        }
    }

    fn base_args(&self, cookie_path: Option<&Path>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = cookie_path {
            args.push("--cookies".to_string());
            args.push(path.display().to_string());
        }
        // Explicit scripting-runtime selection for challenge resolution.
        args.push("--js-runtimes".to_string());
        args.push(self.node_binary.clone());
        args
    }

    /// Fetch the metadata document for a URL (`--dump-json`, no download).
    pub async fn fetch_info(
        &self,
        url: &str,
        cookie_path: Option<&Path>,
        limit: Duration,
    ) -> Result<RawVideoInfo, InvokeError> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-download".to_string(),
            "--skip-download".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.base_args(cookie_path));
        args.push(url.to_string());

        let output = self.execute(&args, limit).await?;
        serde_json::from_str(&output.stdout)
            .map_err(|e| InvokeError::OutputParse(format!("metadata decode failed: {e}")))
    }

    /// Run a download, returning the path of the produced file.
    pub async fn run_download(
        &self,
        spec: &DownloadSpec,
        limit: Duration,
    ) -> Result<DownloadOutcome, InvokeError> {
        let mut args = self.base_args(spec.cookie_path.as_deref());

        // Final file path is read back from this print directive.
        args.push("--print".to_string());
        args.push("after_move:filepath".to_string());
        args.push("--no-simulate".to_string());

        if let Some(format_id) = &spec.format_id {
            args.push("-f".to_string());
            args.push(format_id.clone());
        }

        if spec.extract_audio {
            let format = spec.audio_format.unwrap_or(AudioFormat::Mp3);
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(format.as_str().to_string());
            if format.wants_quality_flag() {
                // "0" is the extractor's best-quality token; a client-requested
                // bitrate never reaches the argv.
                args.push("--audio-quality".to_string());
                args.push("0".to_string());
            }
        }

        args.push("-o".to_string());
        args.push(spec.output_path.display().to_string());

        if spec.include_subtitles {
            args.push("--write-subs".to_string());
            if let Some(lang) = &spec.subtitle_lang {
                args.push("--sub-langs".to_string());
                args.push(lang.clone());
            }
        }

        args.push(spec.url.clone());

        let output = self.execute(&args, limit).await?;
        let file_path = extract_file_path(&output.stdout)
            .ok_or_else(|| InvokeError::OutputParse("could not determine output file path".into()))?;

        Ok(DownloadOutcome {
            file_path: PathBuf::from(file_path),
        })
    }

    /// Lightweight liveness probe: simulate-only metadata fetch against a
    /// known stable URL. Used for cookie validation and connectivity checks.
    pub async fn probe(
        &self,
        url: &str,
        cookie_path: Option<&Path>,
        limit: Duration,
    ) -> Result<(), InvokeError> {
        let mut args = vec![
            "--simulate".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
        ];
        args.extend(self.base_args(cookie_path));
        args.push(url.to_string());

        self.execute(&args, limit).await?;
        Ok(())
    }

    async fn execute(&self, args: &[String], limit: Duration) -> Result<ExecOutput, InvokeError> {
        debug!(command = ?redact_args(args), "executing extractor");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    InvokeError::BinaryMissing
                } else {
                    InvokeError::Spawn(e)
                }
            })?;

        // Drain both pipes concurrently with the wait so a chatty child can
        // never fill a pipe buffer and deadlock.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "extractor timed out, terminating");
                terminate_with_grace(&mut child).await;
                return Err(InvokeError::Timeout(limit));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        debug!(
            exit_code = status.code(),
            stdout_lines = stdout.lines().count(),
            stderr_preview = %redacted_preview(&stderr),
            "extractor execution completed"
        );

        if status.success() {
            Ok(ExecOutput { stdout })
        } else {
            Err(InvokeError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stderr,
            })
        }
    }
}

/// SIGTERM first, SIGKILL after a grace period.
async fn terminate_with_grace(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

fn redacted_preview(stderr: &str) -> String {
    let preview: String = stderr.chars().take(STDERR_PREVIEW_BYTES).collect();
    redact_args(&[preview]).remove(0)
}

/// Derive the produced file path from extractor stdout.
///
/// Preferred: the line emitted by `--print after_move:filepath`. Fallback:
/// the `[download] Destination:` progress line.
pub fn extract_file_path(stdout: &str) -> Option<String> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('[') {
            return Some(line.to_string());
        }
        if let Some(rest) = line.strip_prefix("[download] Destination: ") {
            return Some(rest.trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_stub(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("stub-extractor");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn file_path_from_print_directive() {
        let stdout = "[download] starting\n/downloads/video.mp4\n";
        assert_eq!(
            extract_file_path(stdout).as_deref(),
            Some("/downloads/video.mp4")
        );
    }

    #[test]
    fn file_path_from_destination_line() {
        let stdout = "[download] Destination: /downloads/video.mp4\n[download] 100%\n";
        assert_eq!(
            extract_file_path(stdout).as_deref(),
            Some("/downloads/video.mp4")
        );
    }

    #[test]
    fn no_file_path_in_bracket_noise() {
        assert_eq!(extract_file_path("[info] something\n[debug] else\n"), None);
        assert_eq!(extract_file_path(""), None);
    }

    #[tokio::test]
    async fn fetch_info_decodes_json() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(
            &dir,
            r#"echo '{"id":"abc12345678","title":"T","duration":212,"uploader":"U"}'"#,
        );
        let invoker = ExtractorInvoker::new(stub, "node");
        let info = invoker
            .fetch_info("https://youtu.be/abc12345678", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(info.id.as_deref(), Some("abc12345678"));
        assert_eq!(info.title.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, "echo 'ERROR: Video unavailable' >&2\nexit 1");
        let invoker = ExtractorInvoker::new(stub, "node");
        let err = invoker
            .fetch_info("https://youtu.be/abc12345678", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            InvokeError::NonZeroExit { code, stderr } => {
                assert_eq!(code, 1);
                assert!(stderr.contains("Video unavailable"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_maps_to_binary_missing() {
        let invoker = ExtractorInvoker::new("definitely-not-a-binary-xyz", "node");
        let err = invoker
            .probe("https://youtu.be/x", None, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::BinaryMissing));
    }

    #[tokio::test]
    async fn timeout_kills_subprocess() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, "sleep 30");
        let invoker = ExtractorInvoker::new(stub, "node");
        let started = std::time::Instant::now();
        let err = invoker
            .probe("https://youtu.be/x", None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Timeout(_)));
        // Must not have waited anywhere near the child's sleep.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn download_spec_builds_expected_argv() {
        // The stub prints its own argv so the test can assert flag layout.
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, r#"printf '%s\n' "$@" > "$0.args"; echo /tmp/out.mp4"#);
        let invoker = ExtractorInvoker::new(stub.clone(), "node");
        let spec = DownloadSpec {
            url: "https://www.youtube.com/watch?v=abc12345678".to_string(),
            cookie_path: Some(PathBuf::from("/secrets/youtube.txt")),
            format_id: Some("137+140".to_string()),
            output_path: PathBuf::from("/downloads/T-abc.mp4"),
            extract_audio: false,
            audio_format: None,
            audio_quality: None,
            include_subtitles: true,
            subtitle_lang: Some("en".to_string()),
        };
        let outcome = invoker
            .run_download(&spec, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.file_path, PathBuf::from("/tmp/out.mp4"));

        let recorded = std::fs::read_to_string(format!("{stub}.args")).unwrap();
        let args: Vec<&str> = recorded.lines().collect();
        assert_eq!(args.first(), Some(&"--cookies"));
        assert_eq!(args.get(1), Some(&"/secrets/youtube.txt"));
        assert!(args.contains(&"--js-runtimes"));
        assert!(args.contains(&"-f"));
        assert!(args.contains(&"137+140"));
        assert!(args.contains(&"--write-subs"));
        assert!(args.contains(&"--sub-langs"));
        // URL is always last.
        assert_eq!(
            args.last(),
            Some(&"https://www.youtube.com/watch?v=abc12345678")
        );
    }

    #[tokio::test]
    async fn audio_extraction_flags() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, r#"printf '%s\n' "$@" > "$0.args"; echo /tmp/out.mp3"#);
        let invoker = ExtractorInvoker::new(stub.clone(), "node");
        let spec = DownloadSpec {
            url: "https://youtu.be/abc12345678".to_string(),
            cookie_path: None,
            format_id: None,
            output_path: PathBuf::from("/downloads/a.mp3"),
            extract_audio: true,
            audio_format: Some(AudioFormat::Mp3),
            audio_quality: None,
            include_subtitles: false,
            subtitle_lang: None,
        };
        invoker.run_download(&spec, Duration::from_secs(5)).await.unwrap();

        let recorded = std::fs::read_to_string(format!("{stub}.args")).unwrap();
        let args: Vec<&str> = recorded.lines().collect();
        assert!(args.contains(&"-x"));
        assert!(args.contains(&"--audio-format"));
        assert!(args.contains(&"mp3"));
        assert!(args.contains(&"--audio-quality"));
        assert!(args.contains(&"0"));
    }

    #[tokio::test]
    async fn requested_bitrate_never_reaches_audio_quality_flag() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, r#"printf '%s\n' "$@" > "$0.args"; echo /tmp/out.m4a"#);
        let invoker = ExtractorInvoker::new(stub.clone(), "node");
        let spec = DownloadSpec {
            url: "https://youtu.be/abc12345678".to_string(),
            cookie_path: None,
            format_id: None,
            output_path: PathBuf::from("/downloads/a.m4a"),
            extract_audio: true,
            audio_format: Some(AudioFormat::M4a),
            audio_quality: Some("192".to_string()),
            include_subtitles: false,
            subtitle_lang: None,
        };
        invoker.run_download(&spec, Duration::from_secs(5)).await.unwrap();

        let recorded = std::fs::read_to_string(format!("{stub}.args")).unwrap();
        let args: Vec<&str> = recorded.lines().collect();
        let quality_index = args.iter().position(|a| *a == "--audio-quality").unwrap();
        assert_eq!(args[quality_index + 1], "0");
        assert!(!args.contains(&"192"));
    }
}
