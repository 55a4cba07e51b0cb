//! Metrics counters and Prometheus text exposition.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-scoped metric registry backed by atomics.
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_created: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_expired: AtomicU64,
    metadata_requests: AtomicU64,
    rate_limit_denials: AtomicU64,
    extractor_invocations: AtomicU64,
    retry_attempts: AtomicU64,
    cleanup_files_deleted: AtomicU64,
    cleanup_bytes_reclaimed: AtomicU64,
    queue_depth: AtomicU64,
    active_downloads: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_created(&self) {
        self.jobs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn jobs_expired(&self, count: u64) {
        self.jobs_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn metadata_request(&self) {
        self.metadata_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limit_denied(&self) {
        self.rate_limit_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn extractor_invoked(&self) {
        self.extractor_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_attempted(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup(&self, files_deleted: u64, bytes_reclaimed: u64) {
        self.cleanup_files_deleted
            .fetch_add(files_deleted, Ordering::Relaxed);
        self.cleanup_bytes_reclaimed
            .fetch_add(bytes_reclaimed, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_active_downloads(&self, active: u64) {
        self.active_downloads.store(active, Ordering::Relaxed);
    }

    pub fn download_started(&self) {
        self.active_downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_finished(&self) {
        let _ = self
            .active_downloads
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let counters: [(&str, &str, u64); 10] = [
            (
                "vidgate_jobs_created_total",
                "Download jobs accepted",
                self.jobs_created.load(Ordering::Relaxed),
            ),
            (
                "vidgate_jobs_completed_total",
                "Download jobs completed successfully",
                self.jobs_completed.load(Ordering::Relaxed),
            ),
            (
                "vidgate_jobs_failed_total",
                "Download jobs that terminally failed",
                self.jobs_failed.load(Ordering::Relaxed),
            ),
            (
                "vidgate_jobs_expired_total",
                "Job records removed by the TTL sweeper",
                self.jobs_expired.load(Ordering::Relaxed),
            ),
            (
                "vidgate_metadata_requests_total",
                "Synchronous metadata operations served",
                self.metadata_requests.load(Ordering::Relaxed),
            ),
            (
                "vidgate_rate_limit_denials_total",
                "Requests denied by the rate limiter",
                self.rate_limit_denials.load(Ordering::Relaxed),
            ),
            (
                "vidgate_extractor_invocations_total",
                "Extractor subprocess launches",
                self.extractor_invocations.load(Ordering::Relaxed),
            ),
            (
                "vidgate_retry_attempts_total",
                "Retries performed after retriable errors",
                self.retry_attempts.load(Ordering::Relaxed),
            ),
            (
                "vidgate_cleanup_files_deleted_total",
                "Files removed by the storage reaper",
                self.cleanup_files_deleted.load(Ordering::Relaxed),
            ),
            (
                "vidgate_cleanup_bytes_reclaimed_total",
                "Bytes reclaimed by the storage reaper",
                self.cleanup_bytes_reclaimed.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }

        let gauges: [(&str, &str, u64); 2] = [
            (
                "vidgate_queue_depth",
                "Jobs waiting in the download queue",
                self.queue_depth.load(Ordering::Relaxed),
            ),
            (
                "vidgate_active_downloads",
                "Jobs currently being processed",
                self.active_downloads.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, value) in gauges {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
            ));
        }

        out
    }
}
