//! HTTP handlers: thin translation between the HTTP surface and the
//! control-plane components.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use tracing::info;

use super::error::ApiError;
use super::models::{
    CookieValidationResponse, DownloadAccepted, DownloadRequest, FormatsQuery, FormatsResponse,
    HealthResponse, InfoQuery, JobStatusResponse, LivenessResponse, ProviderQuery,
    ReadinessResponse,
};
use super::state::AppState;
use crate::cookies::CookieError;
use crate::error::ErrorCode;
use crate::jobs::{classify_invoke_error, DownloadParams, JobState, PRIORITY_DOWNLOAD};
use crate::media::{self, FormatKind, RawVideoInfo, VideoInfo};
use crate::providers::ProviderBinding;
use crate::template::ValidatedTemplate;
use crate::validation::{
    validate_audio_quality, validate_format_id, validate_language_code, AudioFormat, UrlValidator,
};

/// Fetch metadata through the provider's retry policy.
async fn fetch_info_with_retry(
    state: &AppState,
    provider: &ProviderBinding,
    url: &str,
) -> Result<RawVideoInfo, ApiError> {
    if state.cookies.is_registered(&provider.name) {
        state.cookies.validate(&provider.name).await?;
    }
    let cookie_path = state.cookies.cookie_path(&provider.name).await;

    let policy = provider.retry_policy();
    let limit = Duration::from_secs(state.config.timeouts.metadata);

    let invoker = state.invoker.clone();
    let metrics = state.metrics.clone();
    let url = url.to_string();
    policy
        .run(
            move |_attempt| {
                let invoker = invoker.clone();
                let url = url.clone();
                let cookie_path = cookie_path.clone();
                metrics.extractor_invoked();
                async move { invoker.fetch_info(&url, cookie_path.as_deref(), limit).await }
            },
            |_, _| {
                state.metrics.retry_attempted();
            },
        )
        .await
        .map_err(|e| {
            let (code, message) = classify_invoke_error(&e, false);
            ApiError::new(code, message)
        })
}

/// `GET /api/v1/info` — synchronous metadata.
pub async fn get_info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> Result<Json<VideoInfo>, ApiError> {
    state.metrics.metadata_request();
    UrlValidator::default().validate(&query.url)?;

    let provider = state.dispatcher.dispatch(&query.url)?;
    let raw = fetch_info_with_retry(&state, &provider, &query.url).await?;

    let formats = raw.formats.clone();
    let subtitles = raw.subtitles.clone();
    let fallback_id = provider.extract_video_id(&query.url).unwrap_or_default();
    let mut response = VideoInfo::from_raw(raw, &fallback_id);

    if query.include_formats {
        response.formats = Some(media::parse_formats(formats));
    }
    if query.include_subtitles {
        response.subtitles = Some(media::parse_subtitles(subtitles));
    }

    info!(video_id = %response.video_id, "video_info_retrieved");
    Ok(Json(response))
}

/// `GET /api/v1/formats` — synchronous format list, best quality first.
pub async fn get_formats(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> Result<Json<FormatsResponse>, ApiError> {
    state.metrics.metadata_request();
    UrlValidator::default().validate(&query.url)?;

    let provider = state.dispatcher.dispatch(&query.url)?;
    let raw = fetch_info_with_retry(&state, &provider, &query.url).await?;
    let formats = media::parse_formats(raw.formats);

    let video_audio = formats
        .iter()
        .filter(|f| f.format_type == FormatKind::VideoAudio)
        .cloned()
        .collect();
    let video_only = formats
        .iter()
        .filter(|f| f.format_type == FormatKind::VideoOnly)
        .cloned()
        .collect();
    let audio_only = formats
        .iter()
        .filter(|f| f.format_type == FormatKind::AudioOnly)
        .cloned()
        .collect();

    info!(url = %query.url, total_formats = formats.len(), "formats_retrieved");
    Ok(Json(FormatsResponse {
        formats,
        video_audio,
        video_only,
        audio_only,
    }))
}

/// `POST /api/v1/download` — validate, create the job and enqueue it.
pub async fn download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    UrlValidator::default().validate(&request.url)?;

    if let Some(format_id) = &request.format_id {
        validate_format_id(format_id)?;
    }
    if let Some(template) = &request.output_template {
        ValidatedTemplate::parse(template)?;
    }
    if let Some(audio_format) = &request.audio_format {
        AudioFormat::parse(audio_format)?;
    }
    if let Some(quality) = &request.audio_quality {
        validate_audio_quality(quality)?;
    }
    if let Some(lang) = &request.subtitle_lang {
        validate_language_code(lang)?;
    }

    // The URL must belong to an enabled provider before a job exists.
    let provider = state.dispatcher.dispatch(&request.url)?;

    let params = DownloadParams {
        format_id: request.format_id,
        output_template: request.output_template,
        extract_audio: request.extract_audio,
        audio_format: request.audio_format,
        audio_quality: request.audio_quality,
        include_subtitles: request.include_subtitles,
        subtitle_lang: request.subtitle_lang,
        priority: PRIORITY_DOWNLOAD,
    };

    let job = state
        .store
        .create(&request.url, params, provider.max_attempts);

    let position = match state.queue.enqueue(&job.id, PRIORITY_DOWNLOAD) {
        Ok(position) => position,
        Err(error) => {
            // A rejected request leaves no job record behind.
            state.store.remove(&job.id);
            return Err(ApiError::new(ErrorCode::QueueFull, error.to_string()));
        }
    };
    let _ = state.store.set_queue_position(&job.id, position);
    state.metrics.job_created();
    state.metrics.set_queue_depth(state.queue.len() as u64);

    info!(job_id = %job.id, queue_position = position, "download_job_created");

    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadAccepted {
            job_id: job.id,
            status: JobState::Pending,
            created_at: job.created_at,
            queue_position: Some(position),
            message: "Download job created and queued".to_string(),
        }),
    ))
}

/// `GET /api/v1/jobs/{id}` — job snapshot.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.store.get(&job_id).ok_or_else(|| {
        ApiError::new(ErrorCode::JobNotFound, format!("Job not found: {job_id}"))
    })?;

    let queue_position = if job.state == JobState::Pending {
        state.queue.position(&job_id)
    } else {
        None
    };

    Ok(Json(JobStatusResponse::from_job(job, queue_position)))
}

/// `POST /api/v1/admin/validate-cookie` — force a validation pass.
pub async fn validate_cookie(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<CookieValidationResponse>, ApiError> {
    info!(provider = %query.provider, "cookie validation requested");
    state.cookies.validate(&query.provider).await?;

    Ok(Json(CookieValidationResponse {
        provider: query.provider.clone(),
        is_valid: true,
        age_hours: state.cookies.age_hours(&query.provider).await,
        warning: state.cookies.age_warning(&query.provider).await,
    }))
}

/// `POST /api/v1/admin/reload-cookie` — atomic hot-reload with rollback.
pub async fn reload_cookie(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
) -> Result<impl IntoResponse, ApiError> {
    info!(provider = %query.provider, "cookie reload requested");
    match state.cookies.reload(&query.provider).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(error @ CookieError::NotConfigured(_)) => Err(ApiError::from(error)),
        // An invalid replacement credential is the caller's mistake.
        Err(error) => Err(ApiError::from(error).with_status(StatusCode::BAD_REQUEST)),
    }
}

/// `GET /health` — aggregate component health.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.prober.check_all().await;
    let status_code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if report.healthy { "healthy" } else { "unhealthy" },
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        components: report.components,
    };

    (status_code, Json(response))
}

/// `GET /liveness` — pure process-alive signal.
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

/// `GET /readiness` — can this instance accept traffic.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.prober.check_ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                ready: true,
                message: None,
            }),
        ),
        Err(issues) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                ready: false,
                message: Some(issues.join("; ")),
            }),
        ),
    }
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.set_queue_depth(state.queue.len() as u64);
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render_prometheus(),
    )
}
