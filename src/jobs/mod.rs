//! Asynchronous job subsystem: in-memory store, bounded priority queue and
//! the worker pool that drives extractor downloads.

pub mod queue;
pub mod store;
pub mod worker;

pub use queue::{DownloadQueue, EnqueueError, PRIORITY_DOWNLOAD, PRIORITY_METADATA};
pub use store::{DownloadParams, Job, JobState, JobStore, JobStoreError};
pub use worker::{classify_invoke_error, spawn_workers, WorkerContext};
