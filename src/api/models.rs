//! Request and response bodies for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::health::ComponentHealth;
use crate::jobs::{Job, JobState};
use crate::media::VideoFormat;

fn default_false() -> bool {
    false
}

/// Query parameters for `GET /api/v1/info`.
#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub url: String,
    #[serde(default = "default_false")]
    pub include_formats: bool,
    #[serde(default = "default_false")]
    pub include_subtitles: bool,
}

/// Query parameters for `GET /api/v1/formats`.
#[derive(Debug, Deserialize)]
pub struct FormatsQuery {
    pub url: String,
}

/// Body for `POST /api/v1/download`.
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: Option<String>,
    pub output_template: Option<String>,
    #[serde(default = "default_false")]
    pub extract_audio: bool,
    pub audio_format: Option<String>,
    pub audio_quality: Option<String>,
    #[serde(default = "default_false")]
    pub include_subtitles: bool,
    pub subtitle_lang: Option<String>,
}

/// 202 response for an accepted download job.
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadAccepted {
    pub job_id: String,
    pub status: JobState,
    pub created_at: DateTime<Utc>,
    pub queue_position: Option<usize>,
    pub message: String,
}

/// `GET /api/v1/formats` response, flat list plus grouped views.
#[derive(Debug, Serialize, Deserialize)]
pub struct FormatsResponse {
    pub formats: Vec<VideoFormat>,
    pub video_audio: Vec<VideoFormat>,
    pub video_only: Vec<VideoFormat>,
    pub audio_only: Vec<VideoFormat>,
}

/// `GET /api/v1/jobs/{id}` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobState,
    pub url: String,
    pub progress: u8,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

impl JobStatusResponse {
    pub fn from_job(job: Job, queue_position: Option<usize>) -> Self {
        Self {
            job_id: job.id,
            status: job.state,
            url: job.url,
            progress: job.progress,
            attempt_count: job.attempt_count,
            error_code: job.error_code,
            error_message: job.error_message,
            file_path: job.file_path.map(|p| p.display().to_string()),
            file_size_bytes: job.file_size_bytes,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            queue_position: queue_position.or(job.queue_position),
        }
    }
}

/// Query parameter for the admin cookie endpoints.
#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub provider: String,
}

/// `POST /api/v1/admin/validate-cookie` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CookieValidationResponse {
    pub provider: String,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// `GET /health` response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    pub uptime_seconds: f64,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// `GET /liveness` response.
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

/// `GET /readiness` response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
