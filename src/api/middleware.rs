//! Authentication and rate-limiting middleware.
//!
//! Auth runs first: the credential comes only from the dedicated header and
//! is compared in constant time. The matched key's hashed identity is what
//! downstream components (and the rate limiter) see; the raw key goes no
//! further than this module.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::error::ErrorCode;
use crate::limiter::{retry_after_seconds, Category, Decision};
use crate::redact::hash_api_key;

/// Header carrying the API credential. Credentials in URL parameters are
/// never accepted.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Paths served without authentication or rate limiting.
const EXCLUDED_PATHS: &[&str] = &[
    "/health",
    "/liveness",
    "/readiness",
    "/metrics",
    "/docs",
    "/redoc",
    "/openapi.json",
];

/// Hashed identity of the authenticated key, inserted into request
/// extensions for downstream consumers.
#[derive(Debug, Clone)]
pub struct KeyIdentity(pub String);

fn is_excluded(path: &str) -> bool {
    let path = path.trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    EXCLUDED_PATHS
        .iter()
        .any(|excluded| path == *excluded || path.starts_with(&format!("{excluded}/")))
}

/// Constant-time membership test over the configured key set.
fn matches_any_key(provided: &str, keys: &[String]) -> bool {
    let provided = provided.as_bytes();
    let mut matched = subtle::Choice::from(0u8);
    for key in keys {
        matched |= provided.ct_eq(key.as_bytes());
    }
    matched.into()
}

fn remote_addr(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// API-key authentication layer.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    if is_excluded(&path) {
        return Ok(next.run(request).await);
    }

    let keys = &state.config.security.api_keys;
    if keys.is_empty() {
        // No keys configured: authentication is disabled (degraded start).
        request
            .extensions_mut()
            .insert(KeyIdentity("anonymous".to_string()));
        return Ok(next.run(request).await);
    }

    let provided = header_key(request.headers()).map(str::to_owned);
    match provided {
        Some(key) if matches_any_key(&key, keys) => {
            let identity = hash_api_key(&key);
            debug!(path = %path, key_hash = %identity, "api key authentication successful");
            request.extensions_mut().insert(KeyIdentity(identity));
            Ok(next.run(request).await)
        }
        _ => {
            warn!(
                path = %path,
                client_ip = %remote_addr(&request),
                "api key authentication failed"
            );
            Err(ApiError::new(
                ErrorCode::AuthFailed,
                "Invalid or missing API key",
            ))
        }
    }
}

/// Token-bucket rate limiting layer. Runs after authentication, so buckets
/// exist only for accepted key identities.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    if is_excluded(&path) {
        return Ok(next.run(request).await);
    }

    let Some(category) = Category::for_path(&path) else {
        return Ok(next.run(request).await);
    };

    let identity = request
        .extensions()
        .get::<KeyIdentity>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    match state.limiter.check(&identity, category) {
        Decision::Allowed => Ok(next.run(request).await),
        Decision::Denied { retry_after } => {
            let secs = retry_after_seconds(retry_after);
            state.metrics.rate_limit_denied();
            warn!(
                path = %path,
                category = category.as_str(),
                key_hash = %identity,
                retry_after_secs = secs,
                "rate_limit_exceeded"
            );
            Err(ApiError::new(
                ErrorCode::RateLimitExceeded,
                format!("Rate limit exceeded for {} operations", category.as_str()),
            )
            .with_retry_after(secs))
        }
    }
}
