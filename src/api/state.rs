use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::cookies::CookieStore;
use crate::extractor::ExtractorInvoker;
use crate::health::HealthProber;
use crate::jobs::{DownloadQueue, JobStore};
use crate::limiter::RateLimiter;
use crate::observability::Metrics;
use crate::providers::ProviderDispatcher;
use crate::startup::StartupReport;
use crate::storage::StorageManager;
use crate::template::TemplateRenderer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<JobStore>,
    pub queue: Arc<DownloadQueue>,
    pub storage: Arc<StorageManager>,
    pub dispatcher: Arc<ProviderDispatcher>,
    pub cookies: Arc<CookieStore>,
    pub invoker: Arc<ExtractorInvoker>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub renderer: TemplateRenderer,
    pub prober: Arc<HealthProber>,
    pub startup: Arc<StartupReport>,
    pub started_at: Instant,
}
