//! In-memory job records with TTL-based expiry.
//!
//! The store exclusively owns all `Job` records; other components hold only
//! job IDs. Workers mutate records through the transition methods, which
//! enforce the job state graph. A background sweeper removes terminal
//! records once their TTL from completion elapses.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queue::PRIORITY_DOWNLOAD;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("invalid job state transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },
}

/// Job lifecycle states.
///
/// ```text
/// PENDING -> PROCESSING -> COMPLETED
///               |  ^  \--> FAILED
///               v  |
///             RETRYING ---> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Processing, JobState::Retrying)
                | (JobState::Retrying, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
                | (JobState::Retrying, JobState::Failed)
        )
    }
}

/// Client-supplied download parameters carried by a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadParams {
    pub format_id: Option<String>,
    pub output_template: Option<String>,
    pub extract_audio: bool,
    pub audio_format: Option<String>,
    pub audio_quality: Option<String>,
    pub include_subtitles: bool,
    pub subtitle_lang: Option<String>,
    pub priority: u8,
}

impl Default for DownloadParams {
    fn default() -> Self {
        Self {
            format_id: None,
            output_template: None,
            extract_audio: false,
            audio_format: None,
            audio_quality: None,
            include_subtitles: false,
            subtitle_lang: None,
            priority: PRIORITY_DOWNLOAD,
        }
    }
}

/// One tracked unit of asynchronous extractor work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub state: JobState,
    pub params: DownloadParams,
    pub progress: u8,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub file_path: Option<PathBuf>,
    pub file_size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub queue_position: Option<usize>,
    /// Output filename relative to the output directory, guarded against the
    /// storage reaper while the record lives.
    pub pinned_file: Option<PathBuf>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// In-memory mapping from job ID to job record.
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a PENDING record with a fresh random ID.
    pub fn create(&self, url: &str, params: DownloadParams, max_attempts: u32) -> Job {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            state: JobState::Pending,
            params,
            progress: 0,
            attempt_count: 0,
            max_attempts,
            error_code: None,
            error_message: None,
            file_path: None,
            file_size_bytes: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            queue_position: None,
            pinned_file: None,
        };

        let mut jobs = self.jobs.lock().expect("job store lock");
        jobs.insert(job.id.clone(), job.clone());
        info!(job_id = %job.id, url, "job_created");
        job
    }

    /// Consistent snapshot read.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        let jobs = self.jobs.lock().expect("job store lock");
        jobs.get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a record entirely. Used when queue admission fails after the
    /// record was created, so a rejected request leaves no job behind.
    pub fn remove(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().expect("job store lock");
        jobs.remove(job_id);
    }

    fn update<F>(&self, job_id: &str, mutate: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobStoreError>,
    {
        let mut jobs = self.jobs.lock().expect("job store lock");
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        mutate(job)?;
        Ok(job.clone())
    }

    fn transition(job: &mut Job, next: JobState) -> Result<(), JobStoreError> {
        if !job.state.can_transition_to(next) {
            return Err(JobStoreError::InvalidTransition {
                from: job.state,
                to: next,
            });
        }
        debug!(job_id = %job.id, from = ?job.state, to = ?next, "job_status_updated");
        job.state = next;
        Ok(())
    }

    /// PENDING/RETRYING -> PROCESSING. Sets `started_at` on first entry and
    /// counts the attempt.
    pub fn mark_processing(&self, job_id: &str) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| {
            Self::transition(job, JobState::Processing)?;
            if job.started_at.is_none() {
                job.started_at = Some(Utc::now());
            }
            job.attempt_count += 1;
            job.queue_position = None;
            Ok(())
        })
    }

    /// PROCESSING -> RETRYING.
    pub fn mark_retrying(&self, job_id: &str) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| Self::transition(job, JobState::Retrying))
    }

    /// PROCESSING -> COMPLETED with result details.
    pub fn complete(
        &self,
        job_id: &str,
        file_path: PathBuf,
        file_size_bytes: u64,
    ) -> Result<Job, JobStoreError> {
        let job = self.update(job_id, |job| {
            Self::transition(job, JobState::Completed)?;
            job.progress = 100;
            job.file_path = Some(file_path);
            job.file_size_bytes = Some(file_size_bytes);
            job.completed_at = Some(Utc::now());
            Ok(())
        })?;
        info!(
            job_id,
            file_size = job.file_size_bytes,
            "job_completed_successfully"
        );
        Ok(job)
    }

    /// PROCESSING/RETRYING -> FAILED with error details.
    pub fn fail(
        &self,
        job_id: &str,
        error_code: &str,
        error_message: &str,
    ) -> Result<Job, JobStoreError> {
        let job = self.update(job_id, |job| {
            Self::transition(job, JobState::Failed)?;
            job.error_code = Some(error_code.to_string());
            job.error_message = Some(error_message.to_string());
            job.completed_at = Some(Utc::now());
            Ok(())
        })?;
        warn!(job_id, error_code, error = error_message, "job_failed");
        Ok(job)
    }

    pub fn set_progress(&self, job_id: &str, progress: u8) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| {
            job.progress = progress.min(100);
            Ok(())
        })
    }

    pub fn set_queue_position(&self, job_id: &str, position: usize) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| {
            job.queue_position = Some(position);
            Ok(())
        })
    }

    pub fn set_pinned_file(&self, job_id: &str, relative: PathBuf) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| {
            job.pinned_file = Some(relative);
            Ok(())
        })
    }

    /// Remove terminal records whose TTL from completion has elapsed.
    /// Returns the removed IDs so callers can release pinned files.
    pub fn sweep_expired(&self) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(24));
        let mut jobs = self.jobs.lock().expect("job store lock");

        let expired: Vec<String> = jobs
            .values()
            .filter(|job| {
                job.is_terminal() && job.completed_at.is_some_and(|done| done < cutoff)
            })
            .map(|job| job.id.clone())
            .collect();

        for id in &expired {
            jobs.remove(id);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "expired_jobs_cleaned");
        }
        expired
    }
}

/// Periodic TTL sweeper. Expired jobs also release their pinned files.
pub async fn run_sweeper(
    store: Arc<JobStore>,
    storage: Arc<crate::storage::StorageManager>,
    metrics: Arc<crate::observability::Metrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_seconds = interval.as_secs(), "job sweeper started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                info!("job sweeper stopped");
                return;
            }
        }

        let expired = store.sweep_expired();
        if !expired.is_empty() {
            metrics.jobs_expired(expired.len() as u64);
            for job_id in &expired {
                storage.unpin(job_id);
            }
        }
    }
}
