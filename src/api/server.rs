use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::state::AppState;
use super::{middleware as api_middleware, services};
use crate::config::Config;
use crate::cookies::{CookieStore, ExtractorLivenessProbe};
use crate::extractor::ExtractorInvoker;
use crate::health::HealthProber;
use crate::jobs::worker::WorkerContext;
use crate::jobs::{spawn_workers, store, DownloadQueue, JobStore};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::observability::Metrics;
use crate::providers::{youtube_binding, ProviderDispatcher};
use crate::startup;
use crate::storage::{run_reaper, StorageManager};
use crate::template::TemplateRenderer;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Interval for the storage reaper and the job TTL sweeper.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Build the full router with auth and rate-limit layers.
///
/// Layer order matters: authentication runs first, so rate-limit buckets
/// only ever exist for accepted key identities.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(services::health))
        .route("/liveness", get(services::liveness))
        .route("/readiness", get(services::readiness))
        .route("/metrics", get(services::metrics))
        .route("/api/v1/info", get(services::get_info))
        .route("/api/v1/formats", get(services::get_formats))
        .route("/api/v1/download", post(services::download))
        .route("/api/v1/jobs/{job_id}", get(services::get_job))
        .route("/api/v1/admin/validate-cookie", post(services::validate_cookie))
        .route("/api/v1/admin/reload-cookie", post(services::reload_cookie))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_middleware::rate_limit,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_middleware::require_api_key,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Assemble all components from configuration. Runs startup validation; a
/// failed validation aborts unless degraded mode downgraded it.
pub async fn build_state(config: Config) -> Result<AppState, AnyError> {
    let storage = Arc::new(StorageManager::new(&config.storage));

    let report = startup::validate_all(&config, &storage).await;
    if !report.success {
        return Err(format!("startup validation failed: {}", report.errors.join("; ")).into());
    }
    for warning in &report.warnings {
        warn!(warning = %warning, "starting in degraded mode");
    }

    let invoker = Arc::new(ExtractorInvoker::new(
        config.extractor.binary.clone(),
        config.extractor.node_binary.clone(),
    ));

    let youtube = Arc::new(youtube_binding(&config.providers.youtube));
    if report.disabled_providers.iter().any(|p| p == "youtube") {
        youtube.disable();
    }
    let dispatcher = Arc::new(ProviderDispatcher::new(vec![youtube.clone()]));

    let mut cookies = CookieStore::new(Box::new(ExtractorLivenessProbe::new(
        ExtractorInvoker::new(
            config.extractor.binary.clone(),
            config.extractor.node_binary.clone(),
        ),
        Duration::from_secs(config.timeouts.metadata),
    )));
    if let Some(path) = &config.providers.youtube.cookie_path {
        if config.providers.youtube.enabled {
            cookies.register("youtube", path.clone());
        }
    }
    let cookies = Arc::new(cookies);

    let limiter = Arc::new(RateLimiter::new(
        RateLimitConfig {
            rpm: config.rate_limiting.metadata_rpm,
            burst_capacity: config.rate_limiting.burst_capacity,
        },
        RateLimitConfig {
            rpm: config.rate_limiting.download_rpm,
            burst_capacity: config.rate_limiting.burst_capacity,
        },
    ));

    let prober = Arc::new(HealthProber {
        extractor_config: config.extractor.clone(),
        invoker: invoker.clone(),
        storage: storage.clone(),
        cookies: cookies.clone(),
    });

    Ok(AppState {
        store: Arc::new(JobStore::new(Duration::from_secs(
            config.downloads.job_ttl_hours * 3600,
        ))),
        queue: Arc::new(DownloadQueue::new(config.downloads.queue_size)),
        storage,
        dispatcher,
        cookies,
        invoker,
        limiter,
        metrics: Arc::new(Metrics::new()),
        renderer: TemplateRenderer::new(config.storage.output_dir.clone()),
        prober,
        startup: Arc::new(report),
        started_at: Instant::now(),
        config: Arc::new(config),
    })
}

/// Spawn workers, the TTL sweeper and the storage reaper.
pub fn spawn_background(
    state: &AppState,
    cancel: &CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let ctx = Arc::new(WorkerContext {
        store: state.store.clone(),
        queue: state.queue.clone(),
        storage: state.storage.clone(),
        dispatcher: state.dispatcher.clone(),
        cookies: state.cookies.clone(),
        invoker: state.invoker.clone(),
        renderer: state.renderer.clone(),
        templates: state.config.templates.clone(),
        timeouts: state.config.timeouts.clone(),
        metrics: state.metrics.clone(),
    });

    let mut handles = spawn_workers(state.config.downloads.max_concurrent, ctx, cancel.clone());

    handles.push(tokio::spawn(store::run_sweeper(
        state.store.clone(),
        state.storage.clone(),
        state.metrics.clone(),
        MAINTENANCE_INTERVAL,
        cancel.clone(),
    )));

    handles.push(tokio::spawn(run_reaper(
        state.storage.clone(),
        state.metrics.clone(),
        MAINTENANCE_INTERVAL,
        cancel.clone(),
    )));

    handles
}

/// Run the HTTP service until SIGINT/SIGTERM.
pub async fn run(config: Config) -> Result<(), AnyError> {
    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let state = build_state(config).await?;
    let cancel = CancellationToken::new();
    let background = spawn_background(&state, &cancel);

    let app = build_router(state);
    let listener = TcpListener::bind(address).await?;
    info!(%address, "vidgate API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop workers; queued-but-unpicked jobs are lost by contract.
    cancel.cancel();
    for handle in background {
        let _ = handle.await;
    }
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
