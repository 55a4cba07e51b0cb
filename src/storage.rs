//! Output directory management: disk accounting, active-file pinning and the
//! age-based storage reaper.
//!
//! The reaper runs on a timer independent of requests. It only ever deletes
//! regular files directly inside the output directory that are older than the
//! retention age and not pinned by a live job; symbolic links are never
//! followed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use nix::sys::statvfs::statvfs;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to initialize output directory {path}: {source}")]
    Init {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("output directory {0} is not writable")]
    NotWritable(PathBuf),
    #[error("failed to read disk usage: {0}")]
    DiskUsage(String),
}

/// Disk usage of the filesystem backing the output directory.
#[derive(Debug, Clone, Copy)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub percent_used: f64,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    pub files_deleted: u64,
    pub bytes_reclaimed: u64,
    pub files_preserved: u64,
    pub dry_run: bool,
}

/// Owns the output directory and the set of files pinned by live jobs.
pub struct StorageManager {
    output_dir: PathBuf,
    cleanup_age: Duration,
    cleanup_threshold: u8,
    max_file_size: u64,
    active_files: Mutex<HashMap<String, HashSet<PathBuf>>>,
}

impl StorageManager {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            cleanup_age: Duration::from_secs(config.cleanup_age * 3600),
            cleanup_threshold: config.cleanup_threshold,
            max_file_size: config.max_file_size,
            active_files: Mutex::new(HashMap::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the output directory and verify it is writable.
    pub fn initialize(&self) -> Result<(), StorageError> {
        if !self.output_dir.exists() {
            std::fs::create_dir_all(&self.output_dir).map_err(|source| StorageError::Init {
                path: self.output_dir.clone(),
                source,
            })?;
            info!(path = %self.output_dir.display(), "output directory created");
        }

        let probe = self
            .output_dir
            .join(format!(".write_test_{}", std::process::id()));
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                info!(output_dir = %self.output_dir.display(), "storage initialized");
                Ok(())
            }
            Err(_) => Err(StorageError::NotWritable(self.output_dir.clone())),
        }
    }

    pub fn disk_usage(&self) -> Result<DiskUsage, StorageError> {
        let stats =
            statvfs(&self.output_dir).map_err(|e| StorageError::DiskUsage(e.to_string()))?;

        let block = stats.fragment_size() as u64;
        let total = stats.blocks() as u64 * block;
        let available = stats.blocks_available() as u64 * block;
        let free = stats.blocks_free() as u64 * block;
        let used = total.saturating_sub(free);
        let percent_used = if total > 0 {
            (used as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Ok(DiskUsage {
            total,
            used,
            available,
            percent_used,
        })
    }

    /// Whether disk pressure warrants a cleanup pass.
    pub fn should_cleanup(&self) -> bool {
        match self.disk_usage() {
            Ok(usage) => {
                let exceeded = usage.percent_used >= f64::from(self.cleanup_threshold);
                if exceeded {
                    info!(
                        disk_usage_percent = usage.percent_used,
                        threshold = self.cleanup_threshold,
                        "cleanup threshold exceeded"
                    );
                }
                exceeded
            }
            Err(error) => {
                error!(error = %error, "disk usage check failed, skipping cleanup");
                false
            }
        }
    }

    /// Pin a file to a live job, protecting it from the reaper.
    pub fn pin(&self, job_id: &str, path: &Path) {
        let mut active = self.active_files.lock().expect("active file lock");
        active
            .entry(job_id.to_string())
            .or_default()
            .insert(path.to_path_buf());
        debug!(job_id, filepath = %path.display(), "file pinned to job");
    }

    /// Release all files pinned by a job.
    pub fn unpin(&self, job_id: &str) {
        let mut active = self.active_files.lock().expect("active file lock");
        if let Some(files) = active.remove(job_id) {
            debug!(job_id, files_released = files.len(), "job unpinned");
        }
    }

    pub fn is_pinned(&self, path: &Path) -> bool {
        let active = self.active_files.lock().expect("active file lock");
        active.values().any(|files| files.contains(path))
    }

    pub fn pinned_count(&self) -> usize {
        let active = self.active_files.lock().expect("active file lock");
        active.len()
    }

    /// Whether an estimated size fits under the configured cap. Zero or
    /// unknown sizes are allowed through.
    pub fn within_size_limit(&self, estimated_size: u64) -> bool {
        if estimated_size == 0 {
            return true;
        }
        let within = estimated_size <= self.max_file_size;
        if !within {
            warn!(
                estimated_size,
                max_size = self.max_file_size,
                "file size limit exceeded"
            );
        }
        within
    }

    /// Delete (or, in dry-run, count) unpinned regular files older than the
    /// retention age.
    pub fn cleanup(&self, dry_run: bool) -> CleanupStats {
        let mut stats = CleanupStats {
            dry_run,
            ..CleanupStats::default()
        };
        let now = SystemTime::now();

        info!(
            output_dir = %self.output_dir.display(),
            max_age_hours = self.cleanup_age.as_secs() / 3600,
            dry_run,
            "cleanup started"
        );

        let entries = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(error) => {
                error!(error = %error, "cleanup directory access failed");
                return stats;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }

            // symlink_metadata never follows links, so a symlink pointing
            // outside the output directory is skipped rather than chased.
            let metadata = match std::fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!(filepath = %path.display(), error = %error, "file cleanup failed");
                    continue;
                }
            };
            if !metadata.file_type().is_file() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or(Duration::ZERO);
            if age < self.cleanup_age {
                continue;
            }

            if self.is_pinned(&path) {
                stats.files_preserved += 1;
                debug!(filepath = %path.display(), "file preserved, pinned to active job");
                continue;
            }

            let size = metadata.len();
            if !dry_run {
                if let Err(error) = std::fs::remove_file(&path) {
                    warn!(filepath = %path.display(), error = %error, "file cleanup failed");
                    continue;
                }
            }

            stats.files_deleted += 1;
            stats.bytes_reclaimed += size;
            info!(
                filepath = %path.display(),
                size_bytes = size,
                age_hours = age.as_secs() / 3600,
                dry_run,
                "file deleted"
            );
        }

        info!(
            files_deleted = stats.files_deleted,
            bytes_reclaimed = stats.bytes_reclaimed,
            files_preserved = stats.files_preserved,
            dry_run,
            "cleanup completed"
        );

        stats
    }

    /// Threshold-gated cleanup used by the timer; `force` skips the disk
    /// check for explicit triggers.
    pub fn run_cleanup_if_needed(&self, force: bool) -> Option<CleanupStats> {
        if force || self.should_cleanup() {
            Some(self.cleanup(false))
        } else {
            debug!("cleanup not needed, threshold not exceeded");
            None
        }
    }
}

/// Periodic reaper loop. Runs until cancelled.
pub async fn run_reaper(
    storage: std::sync::Arc<StorageManager>,
    metrics: std::sync::Arc<crate::observability::Metrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_seconds = interval.as_secs(), "storage reaper started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                info!("storage reaper stopped");
                return;
            }
        }

        if let Some(stats) = storage.run_cleanup_if_needed(false) {
            metrics.record_cleanup(stats.files_deleted, stats.bytes_reclaimed);
        }
    }
}
