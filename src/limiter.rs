//! Per-key token bucket rate limiting.
//!
//! One bucket exists per (key identity, category) pair. Buckets are created
//! lazily on first admission and live for the process lifetime. Admission
//! decisions on a single bucket are serialized behind the map lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Rate limit categories. Each category has an independent bucket per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Metadata,
    Download,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Metadata => "metadata",
            Category::Download => "download",
        }
    }

    /// Map a request path to its rate-limit category. Paths outside the
    /// rate-limited surface return `None`.
    pub fn for_path(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        if path.starts_with("/api/v1/info") || path.starts_with("/api/v1/formats") {
            Some(Category::Metadata)
        } else if path.starts_with("/api/v1/download") {
            Some(Category::Download)
        } else {
            None
        }
    }
}

/// Limits for one category.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub rpm: u32,
    pub burst_capacity: u32,
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst_capacity);
        Self {
            capacity,
            refill_rate: f64::from(config.rpm) / 60.0,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed,
    Denied { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Token bucket rate limiter keyed by (hashed key identity, category).
pub struct RateLimiter {
    metadata: RateLimitConfig,
    download: RateLimitConfig,
    buckets: Mutex<HashMap<(String, Category), TokenBucket>>,
}

impl RateLimiter {
    pub fn new(metadata: RateLimitConfig, download: RateLimitConfig) -> Self {
        Self {
            metadata,
            download,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn limits_for(&self, category: Category) -> RateLimitConfig {
        match category {
            Category::Metadata => self.metadata,
            Category::Download => self.download,
        }
    }

    /// Admit or deny one request. On denial the bucket is left untouched and
    /// the duration until one full token accrues is returned.
    pub fn check(&self, key_identity: &str, category: Category) -> Decision {
        self.check_at(key_identity, category, Instant::now())
    }

    fn check_at(&self, key_identity: &str, category: Category, now: Instant) -> Decision {
        let limits = self.limits_for(category);
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        let bucket = buckets
            .entry((key_identity.to_string(), category))
            .or_insert_with(|| TokenBucket::new(limits));

        bucket.refill(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            debug!(
                category = category.as_str(),
                tokens_remaining = bucket.tokens,
                "rate_limit_check_passed"
            );
            Decision::Allowed
        } else {
            let needed = 1.0 - bucket.tokens;
            let retry_after = Duration::from_secs_f64(needed / bucket.refill_rate);
            debug!(
                category = category.as_str(),
                retry_after_secs = retry_after.as_secs_f64(),
                "rate_limit_exceeded"
            );
            Decision::Denied { retry_after }
        }
    }

    /// Tokens currently available for a bucket, for metrics and tests.
    pub fn available_tokens(&self, key_identity: &str, category: Category) -> Option<f64> {
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        let bucket = buckets.get_mut(&(key_identity.to_string(), category))?;
        bucket.refill(Instant::now());
        Some(bucket.tokens)
    }
}

/// Retry-After header value: whole seconds, rounded up so the client never
/// retries before a token is available.
pub fn retry_after_seconds(retry_after: Duration) -> u64 {
    retry_after.as_secs_f64().ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(metadata_rpm: u32, download_rpm: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(
            RateLimitConfig {
                rpm: metadata_rpm,
                burst_capacity: burst,
            },
            RateLimitConfig {
                rpm: download_rpm,
                burst_capacity: burst,
            },
        )
    }

    #[test]
    fn burst_admits_up_to_capacity_then_denies() {
        let limiter = limiter(100, 10, 20);
        for _ in 0..20 {
            assert!(limiter.check("key", Category::Metadata).is_allowed());
        }
        match limiter.check("key", Category::Metadata) {
            Decision::Denied { retry_after } => {
                // 100 rpm refills one token in 0.6s.
                assert!(retry_after <= Duration::from_secs(1));
                assert_eq!(retry_after_seconds(retry_after), 1);
            }
            Decision::Allowed => panic!("21st request must be denied"),
        }
    }

    #[test]
    fn denial_does_not_drain_tokens() {
        let limiter = limiter(60, 10, 2);
        assert!(limiter.check("key", Category::Metadata).is_allowed());
        assert!(limiter.check("key", Category::Metadata).is_allowed());
        let before = limiter.available_tokens("key", Category::Metadata).unwrap();
        assert!(!limiter.check("key", Category::Metadata).is_allowed());
        let after = limiter.available_tokens("key", Category::Metadata).unwrap();
        assert!(after >= before);
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = limiter(60, 10, 1);
        let start = Instant::now();
        assert!(limiter.check_at("key", Category::Metadata, start).is_allowed());
        assert!(!limiter.check_at("key", Category::Metadata, start).is_allowed());
        // 60 rpm = 1 token/second.
        let later = start + Duration::from_secs(1);
        assert!(limiter.check_at("key", Category::Metadata, later).is_allowed());
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let limiter = limiter(6000, 10, 5);
        let start = Instant::now();
        assert!(limiter.check_at("key", Category::Metadata, start).is_allowed());
        // A long idle period must clamp at capacity, not accumulate.
        let much_later = start + Duration::from_secs(3600);
        assert!(limiter
            .check_at("key", Category::Metadata, much_later)
            .is_allowed());
        let tokens = limiter.available_tokens("key", Category::Metadata).unwrap();
        assert!(tokens <= 5.0);
    }

    #[test]
    fn categories_are_independent() {
        let limiter = limiter(100, 10, 1);
        assert!(limiter.check("key", Category::Metadata).is_allowed());
        assert!(limiter.check("key", Category::Download).is_allowed());
        assert!(!limiter.check("key", Category::Metadata).is_allowed());
        assert!(!limiter.check("key", Category::Download).is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(100, 10, 1);
        assert!(limiter.check("alice", Category::Metadata).is_allowed());
        assert!(limiter.check("bob", Category::Metadata).is_allowed());
    }

    #[test]
    fn retry_after_scales_with_refill_rate() {
        let limiter = limiter(6, 10, 1);
        let start = Instant::now();
        assert!(limiter.check_at("key", Category::Metadata, start).is_allowed());
        match limiter.check_at("key", Category::Metadata, start) {
            Decision::Denied { retry_after } => {
                // 6 rpm = one token every 10 seconds.
                assert!(retry_after > Duration::from_secs(9));
                assert!(retry_after <= Duration::from_secs(10));
            }
            Decision::Allowed => panic!("must deny"),
        }
    }

    #[test]
    fn path_categories() {
        assert_eq!(Category::for_path("/api/v1/info"), Some(Category::Metadata));
        assert_eq!(
            Category::for_path("/api/v1/formats/"),
            Some(Category::Metadata)
        );
        assert_eq!(
            Category::for_path("/api/v1/download"),
            Some(Category::Download)
        );
        assert_eq!(Category::for_path("/api/v1/jobs/abc"), None);
        assert_eq!(Category::for_path("/health"), None);
    }
}
