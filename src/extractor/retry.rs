//! Retry classification and bounded backoff around extractor calls.
//!
//! Classification is a pure function over the error kind and stderr text.
//! Non-retriable failures (private video, bad format, auth, disk full)
//! bypass all remaining attempts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::invoker::InvokeError;

/// Substrings of stderr that indicate a transient upstream failure.
const RETRIABLE_PATTERNS: &[&str] = &[
    "http error 5",
    "connection reset",
    "timeout",
    "timed out",
    "too many requests",
    "http error 429",
    "unable to connect",
];

/// Whether an error should be retried or surfaced immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retriable,
    Fatal,
}

/// Classify raw stderr text from the extractor.
pub fn is_retriable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRIABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classify an invocation error.
pub fn classify(error: &InvokeError) -> ErrorClass {
    match error {
        // A killed subprocess is worth another attempt.
        InvokeError::Timeout(_) => ErrorClass::Retriable,
        InvokeError::NonZeroExit { stderr, .. } => {
            if is_retriable_message(stderr) {
                ErrorClass::Retriable
            } else {
                ErrorClass::Fatal
            }
        }
        InvokeError::BinaryMissing
        | InvokeError::OutputParse(_)
        | InvokeError::Spawn(_)
        | InvokeError::Io(_) => ErrorClass::Fatal,
    }
}

/// Attempt bound plus the sleep schedule between retriable attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_secs: &[u64]) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }

    /// Sleep before retry number `attempt` (1-indexed). The schedule's last
    /// element repeats if attempts outnumber entries.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).saturating_sub(1);
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Run `operation` up to `max_attempts` times. `on_retry` fires between
    /// attempts with the 1-indexed attempt that just failed; the final error
    /// is surfaced once attempts are exhausted or a fatal error occurs.
    pub async fn run<T, F, Fut, R>(
        &self,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, InvokeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, InvokeError>>,
        R: FnMut(u32, &InvokeError),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if classify(&error) == ErrorClass::Fatal || attempt >= self.max_attempts {
                        return Err(error);
                    }
                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_seconds = delay.as_secs(),
                        error = %error,
                        "retrying after retriable error"
                    );
                    on_retry(attempt, &error);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn exit_err(stderr: &str) -> InvokeError {
        InvokeError::NonZeroExit {
            code: 1,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn server_errors_are_retriable() {
        assert!(is_retriable_message("HTTP Error 503: Service Unavailable"));
        assert!(is_retriable_message("HTTP Error 500"));
        assert!(is_retriable_message("Connection reset by peer"));
        assert!(is_retriable_message("Read timeout"));
        assert!(is_retriable_message("429 Too Many Requests"));
    }

    #[test]
    fn content_errors_are_fatal() {
        assert!(!is_retriable_message("ERROR: Private video"));
        assert!(!is_retriable_message("ERROR: Video unavailable"));
        assert!(!is_retriable_message("Requested format is not available"));
        assert!(!is_retriable_message("Sign in to confirm your age"));
        assert!(!is_retriable_message("No space left on device"));
    }

    #[test]
    fn timeout_is_retriable_binary_missing_fatal() {
        assert_eq!(
            classify(&InvokeError::Timeout(Duration::from_secs(10))),
            ErrorClass::Retriable
        );
        assert_eq!(classify(&InvokeError::BinaryMissing), ErrorClass::Fatal);
    }

    #[test]
    fn backoff_schedule_lookup() {
        let policy = RetryPolicy::new(3, &[2, 4, 8]);
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        // Schedule exhausts: last entry repeats.
        assert_eq!(policy.delay_after(9), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_schedule() {
        let policy = RetryPolicy::new(3, &[2, 4, 8]);
        let attempts = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));

        let attempts_in = attempts.clone();
        let retries_in = retries.clone();
        let started = tokio::time::Instant::now();
        let result = policy
            .run(
                move |attempt| {
                    attempts_in.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(exit_err("HTTP Error 503"))
                        } else {
                            Ok("done")
                        }
                    }
                },
                move |_, _| {
                    retries_in.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
        // Slept 2s then 4s between attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_bypasses_remaining_attempts() {
        let policy = RetryPolicy::new(3, &[2, 4, 8]);
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts_in = attempts.clone();
        let result: Result<(), _> = policy
            .run(
                move |_| {
                    attempts_in.fetch_add(1, Ordering::SeqCst);
                    async { Err(exit_err("ERROR: Private video")) }
                },
                |_, _| {},
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_last_error() {
        let policy = RetryPolicy::new(3, &[2, 4, 8]);
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts_in = attempts.clone();
        let result: Result<(), _> = policy
            .run(
                move |attempt| {
                    attempts_in.fetch_add(1, Ordering::SeqCst);
                    async move { Err(exit_err(&format!("HTTP Error 503 attempt {attempt}"))) }
                },
                |_, _| {},
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match err {
            InvokeError::NonZeroExit { stderr, .. } => {
                assert!(stderr.contains("attempt 3"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
