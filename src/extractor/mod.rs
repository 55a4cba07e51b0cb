//! Extractor subprocess integration.
//!
//! The external extractor CLI is the system's key dependency. `invoker`
//! builds argument vectors and runs the child process; `retry` classifies
//! failures and drives the bounded retry schedule around it.

pub mod invoker;
pub mod retry;

pub use invoker::{DownloadOutcome, DownloadSpec, ExtractorInvoker, InvokeError};
pub use retry::{is_retriable_message, ErrorClass, RetryPolicy};
