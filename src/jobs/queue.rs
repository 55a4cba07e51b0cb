//! Bounded priority queue for download jobs.
//!
//! Lower priority value = earlier execution; ties are FIFO by enqueue
//! sequence. Admission fails once the queue is at capacity. Dequeue is
//! blocking and cancellable for idle workers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Priority assigned to metadata operations.
pub const PRIORITY_METADATA: u8 = 1;

/// Priority assigned to download operations.
pub const PRIORITY_DOWNLOAD: u8 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("queue is full (max {0} jobs), please try again later")]
    QueueFull(usize),
}

#[derive(Debug, Eq, PartialEq)]
struct QueueEntry {
    priority: u8,
    seq: u64,
    job_id: String,
}

// BinaryHeap is a max-heap; invert so the smallest (priority, seq) pops first.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

/// Bounded priority queue with cancellable blocking dequeue.
pub struct DownloadQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DownloadQueue {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "download queue initialized");
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Admit a job, returning its 1-indexed queue position.
    pub fn enqueue(&self, job_id: &str, priority: u8) -> Result<usize, EnqueueError> {
        let position = {
            let mut state = self.state.lock().expect("queue lock");
            if state.heap.len() >= self.capacity {
                return Err(EnqueueError::QueueFull(self.capacity));
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueueEntry {
                priority,
                seq,
                job_id: job_id.to_string(),
            });

            rank_of(&state.heap, job_id)
        };

        info!(
            job_id,
            priority,
            queue_position = position,
            "job_enqueued"
        );
        self.notify.notify_one();
        Ok(position)
    }

    /// Non-blocking pop of the highest-priority job.
    pub fn try_pop(&self) -> Option<String> {
        let mut state = self.state.lock().expect("queue lock");
        let entry = state.heap.pop()?;
        debug!(job_id = %entry.job_id, priority = entry.priority, "job_dequeued");
        Some(entry.job_id)
    }

    /// Blocking pop; resolves to `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<String> {
        loop {
            if let Some(job_id) = self.try_pop() {
                return Some(job_id);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// 1-indexed position of a queued job, `None` once dequeued.
    pub fn position(&self, job_id: &str) -> Option<usize> {
        let state = self.state.lock().expect("queue lock");
        if state.heap.iter().any(|e| e.job_id == job_id) {
            Some(rank_of(&state.heap, job_id))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn rank_of(heap: &BinaryHeap<QueueEntry>, job_id: &str) -> usize {
    let mut entries: Vec<(u8, u64, &str)> = heap
        .iter()
        .map(|e| (e.priority, e.seq, e.job_id.as_str()))
        .collect();
    entries.sort();
    entries
        .iter()
        .position(|(_, _, id)| *id == job_id)
        .map(|i| i + 1)
        .unwrap_or(entries.len())
}
