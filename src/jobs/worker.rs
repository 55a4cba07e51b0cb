//! Worker pool processing queued download jobs.
//!
//! Each worker acquires a concurrency slot, pops the highest-priority job,
//! and drives it through the provider's retry policy around the extractor.
//! A worker owns its in-flight job exclusively; job state transitions happen
//! only here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{TemplatesConfig, TimeoutsConfig};
use crate::cookies::{CookieError, CookieStore};
use crate::error::ErrorCode;
use crate::extractor::{DownloadSpec, ExtractorInvoker, InvokeError};
use crate::jobs::queue::DownloadQueue;
use crate::jobs::store::{Job, JobStore};
use crate::media::RawVideoInfo;
use crate::observability::Metrics;
use crate::providers::{DispatchError, ProviderBinding, ProviderDispatcher};
use crate::storage::StorageManager;
use crate::template::{is_strict_descendant, TemplateRenderer};
use crate::validation::AudioFormat;

/// Everything a worker needs to process jobs.
pub struct WorkerContext {
    pub store: Arc<JobStore>,
    pub queue: Arc<DownloadQueue>,
    pub storage: Arc<StorageManager>,
    pub dispatcher: Arc<ProviderDispatcher>,
    pub cookies: Arc<CookieStore>,
    pub invoker: Arc<ExtractorInvoker>,
    pub renderer: TemplateRenderer,
    pub templates: TemplatesConfig,
    pub timeouts: TimeoutsConfig,
    pub metrics: Arc<Metrics>,
}

/// Terminal failure of a job, already mapped to an error code.
struct JobFailure {
    code: ErrorCode,
    message: String,
}

impl JobFailure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Spawn the worker pool. Workers run until the token is cancelled; an
/// in-flight extractor call finishes (or is killed by its own timeout)
/// before the worker exits.
pub fn spawn_workers(
    count: usize,
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let semaphore = Arc::new(Semaphore::new(count));
    (0..count)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, ctx, semaphore, cancel).await;
            })
        })
        .collect()
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    info!(worker_id, "download worker started");
    loop {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = cancel.cancelled() => break,
        };

        let Some(job_id) = ctx.queue.pop(&cancel).await else {
            break;
        };
        ctx.metrics.set_queue_depth(ctx.queue.len() as u64);
        ctx.metrics.download_started();

        process_job(&ctx, &job_id).await;

        ctx.metrics.download_finished();
        drop(permit);
    }
    info!(worker_id, "download worker stopped");
}

async fn process_job(ctx: &WorkerContext, job_id: &str) {
    let Some(job) = ctx.store.get(job_id) else {
        warn!(job_id, "job vanished before processing");
        return;
    };

    info!(job_id, url = %job.url, "job_processing_started");

    if let Err(error) = ctx.store.mark_processing(job_id) {
        error!(job_id, error = %error, "could not start processing");
        return;
    }

    match run_download_job(ctx, &job).await {
        Ok((file_path, file_size)) => {
            if let Err(error) = ctx.store.complete(job_id, file_path, file_size) {
                error!(job_id, error = %error, "could not record completion");
            }
            ctx.metrics.job_completed();
            // The produced file stays pinned until the job record expires.
        }
        Err(failure) => {
            if let Err(error) = ctx.store.fail(job_id, failure.code.as_str(), &failure.message) {
                error!(job_id, error = %error, "could not record failure");
            }
            ctx.metrics.job_failed();
            ctx.storage.unpin(job_id);
        }
    }
}

async fn run_download_job(ctx: &WorkerContext, job: &Job) -> Result<(PathBuf, u64), JobFailure> {
    let provider = ctx.dispatcher.dispatch(&job.url).map_err(|e| match e {
        DispatchError::NoProvider(_) => JobFailure::new(ErrorCode::InvalidUrl, e.to_string()),
        DispatchError::ProviderDisabled(_) => {
            JobFailure::new(ErrorCode::ComponentUnavailable, e.to_string())
        }
    })?;

    let cookie_path = resolve_cookie(ctx, &provider).await?;
    let policy = provider.retry_policy();

    // Metadata pass: supplies template variables and the size estimate.
    let metadata_timeout = Duration::from_secs(ctx.timeouts.metadata);
    let info = {
        let invoker = ctx.invoker.clone();
        let metrics = ctx.metrics.clone();
        let url = job.url.clone();
        let cookie = cookie_path.clone();
        policy
            .run(
                move |_attempt| {
                    let invoker = invoker.clone();
                    let url = url.clone();
                    let cookie = cookie.clone();
                    metrics.extractor_invoked();
                    async move { invoker.fetch_info(&url, cookie.as_deref(), metadata_timeout).await }
                },
                |_, _| {},
            )
            .await
            .map_err(|e| map_invoke_error(&e, job.params.extract_audio))?
    };

    if let Some(estimate) = info.filesize_approx {
        if !ctx.storage.within_size_limit(estimate) {
            return Err(JobFailure::new(
                ErrorCode::FileTooLarge,
                format!("estimated size {estimate} bytes exceeds the configured limit"),
            ));
        }
    }

    let variables = template_variables(&provider, job, &info);
    let template = job
        .params
        .output_template
        .clone()
        .unwrap_or_else(|| ctx.templates.default_output.clone());
    let output_path = ctx
        .renderer
        .build_output_path(Some(&template), &variables)
        .map_err(|e| JobFailure::new(ErrorCode::InvalidFormat, e.to_string()))?;

    ctx.storage.pin(&job.id, &output_path);
    if let Some(name) = output_path.file_name() {
        let _ = ctx.store.set_pinned_file(&job.id, PathBuf::from(name));
    }

    let audio_format = job
        .params
        .audio_format
        .as_deref()
        .and_then(|f| AudioFormat::parse(f).ok());
    let spec = DownloadSpec {
        url: job.url.clone(),
        cookie_path,
        format_id: job.params.format_id.clone(),
        output_path: output_path.clone(),
        extract_audio: job.params.extract_audio,
        audio_format,
        audio_quality: job.params.audio_quality.clone(),
        include_subtitles: job.params.include_subtitles,
        subtitle_lang: job.params.subtitle_lang.clone(),
    };

    // Audio conversion runs inside the same subprocess, so its time
    // allowance is added on top of the download timeout.
    let mut download_timeout = Duration::from_secs(ctx.timeouts.download);
    if spec.extract_audio {
        download_timeout += Duration::from_secs(ctx.timeouts.audio_conversion);
    }

    let outcome = {
        let invoker = ctx.invoker.clone();
        let metrics = ctx.metrics.clone();
        let store = ctx.store.clone();
        let job_id = job.id.clone();
        let spec = spec.clone();
        policy
            .run(
                move |attempt| {
                    let invoker = invoker.clone();
                    let spec = spec.clone();
                    let store = store.clone();
                    let job_id = job_id.clone();
                    metrics.extractor_invoked();
                    async move {
                        if attempt > 1 {
                            // RETRYING -> PROCESSING at the start of each retry.
                            let _ = store.mark_processing(&job_id);
                        }
                        invoker.run_download(&spec, download_timeout).await
                    }
                },
                |_attempt, _error| {
                    let _ = ctx.store.mark_retrying(&job.id);
                    ctx.metrics.retry_attempted();
                },
            )
            .await
            .map_err(|e| map_invoke_error(&e, job.params.extract_audio))?
    };

    let file_path = outcome.file_path;
    if !is_strict_descendant(&file_path, ctx.storage.output_dir()) {
        return Err(JobFailure::new(
            ErrorCode::DownloadFailed,
            format!(
                "extractor produced a file outside the output directory: {}",
                file_path.display()
            ),
        ));
    }

    let file_size = std::fs::metadata(&file_path)
        .map(|m| m.len())
        .map_err(|e| {
            JobFailure::new(
                ErrorCode::DownloadFailed,
                format!("downloaded file missing: {e}"),
            )
        })?;

    Ok((file_path, file_size))
}

async fn resolve_cookie(
    ctx: &WorkerContext,
    provider: &ProviderBinding,
) -> Result<Option<PathBuf>, JobFailure> {
    if !ctx.cookies.is_registered(&provider.name) {
        return Ok(None);
    }
    ctx.cookies
        .validate(&provider.name)
        .await
        .map_err(|e| match e {
            CookieError::FileMissing(_) | CookieError::NotConfigured(_) => {
                JobFailure::new(ErrorCode::MissingCookie, e.to_string())
            }
            CookieError::Io(_) => JobFailure::new(ErrorCode::ComponentUnavailable, e.to_string()),
            other => JobFailure::new(ErrorCode::CookieExpired, other.to_string()),
        })?;
    Ok(ctx.cookies.cookie_path(&provider.name).await)
}

fn template_variables(
    provider: &ProviderBinding,
    job: &Job,
    info: &RawVideoInfo,
) -> HashMap<String, String> {
    let video_id = info
        .id
        .clone()
        .or_else(|| provider.extract_video_id(&job.url))
        .unwrap_or_else(|| "unknown".to_string());

    let ext = if job.params.extract_audio {
        job.params
            .audio_format
            .clone()
            .unwrap_or_else(|| "mp3".to_string())
    } else {
        info.formats
            .iter()
            .find(|f| {
                job.params.format_id.is_some() && f.format_id == job.params.format_id
            })
            .and_then(|f| f.ext.clone())
            .unwrap_or_else(|| "mp4".to_string())
    };

    let mut variables = HashMap::new();
    variables.insert("id".to_string(), video_id);
    variables.insert(
        "title".to_string(),
        info.title.clone().unwrap_or_else(|| "video".to_string()),
    );
    variables.insert("ext".to_string(), ext);
    variables.insert(
        "upload_date".to_string(),
        info.upload_date.clone().unwrap_or_default(),
    );
    variables.insert(
        "uploader".to_string(),
        info.uploader.clone().unwrap_or_default(),
    );
    variables.insert("resolution".to_string(), String::new());
    variables.insert(
        "format_id".to_string(),
        job.params.format_id.clone().unwrap_or_else(|| "best".to_string()),
    );
    variables
}

/// Map an invocation error onto the error taxonomy. Shared with the
/// synchronous metadata path.
pub fn classify_invoke_error(error: &InvokeError, extract_audio: bool) -> (ErrorCode, String) {
    match error {
        InvokeError::BinaryMissing => (ErrorCode::ComponentUnavailable, error.to_string()),
        InvokeError::Timeout(_) => (ErrorCode::DownloadFailed, error.to_string()),
        InvokeError::NonZeroExit { stderr, .. } => {
            let lower = stderr.to_lowercase();
            let code = if lower.contains("video unavailable") || lower.contains("private video") {
                ErrorCode::VideoUnavailable
            } else if lower.contains("requested format is not available") {
                ErrorCode::FormatNotFound
            } else if lower.contains("no space left") {
                ErrorCode::StorageFull
            } else if extract_audio
                && (lower.contains("postprocess") || lower.contains("ffmpeg"))
            {
                ErrorCode::TranscodingFailed
            } else {
                ErrorCode::DownloadFailed
            };
            (code, stderr.trim().to_string())
        }
        InvokeError::OutputParse(_) | InvokeError::Spawn(_) | InvokeError::Io(_) => {
            (ErrorCode::DownloadFailed, error.to_string())
        }
    }
}

fn map_invoke_error(error: &InvokeError, extract_audio: bool) -> JobFailure {
    let (code, message) = classify_invoke_error(error, extract_audio);
    JobFailure::new(code, message)
}
