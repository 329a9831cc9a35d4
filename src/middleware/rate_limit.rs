//! Rate limiting middleware

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateSpec;
use crate::error::ApiError;
use crate::ApiState;

/// Clients tracked per limiter. Past this, full buckets are dropped first,
/// then the least recently seen.
const MAX_BUCKETS: usize = 10_000;

/// Routes limited by the webhook budget instead of the default one
const WEBHOOK_PATHS: &[&str] = &[
    "/api/v1/webhooks/github",
    "/api/v1/webhooks/gitlab",
    "/api/v1/billing/webhook",
];

/// Per-client rate limiting for every request.
///
/// Webhook POSTs draw from their own budget so CI bursts do not starve the
/// dashboard.
pub async fn rate_limit(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limiter = if req.method() == Method::POST && WEBHOOK_PATHS.contains(&req.uri().path()) {
        &state.webhook_limiter
    } else {
        &state.default_limiter
    };

    let key = client_key(&req);
    match limiter.check(&key) {
        RateLimitResult::Allowed { remaining } => {
            let mut response = next.run(req).await;
            if let Some(remaining) = remaining {
                if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                    response.headers_mut().insert("x-ratelimit-remaining", value);
                }
            }
            Ok(response)
        }
        RateLimitResult::Limited { retry_after } => {
            tracing::warn!("Rate limit exceeded for {} on {}", key, req.uri().path());
            Err(ApiError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            })
        }
    }
}

/// Client address: socket peer, else first `X-Forwarded-For` hop
pub fn client_key(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limiter
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
    spec: RateSpec,
    enabled: bool,
    max_buckets: usize,
}

impl RateLimiter {
    pub fn new(spec: RateSpec, enabled: bool) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            spec,
            enabled,
            max_buckets: MAX_BUCKETS,
        }
    }

    #[cfg(test)]
    fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    fn evict(&self, buckets: &mut HashMap<String, TokenBucket>) {
        buckets.retain(|_, bucket| !bucket.is_full());
        while buckets.len() >= self.max_buckets {
            let Some(oldest) = buckets
                .iter()
                .min_by_key(|(_, bucket)| bucket.last_seen)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            buckets.remove(&oldest);
        }
    }

    /// Check if request is allowed
    pub fn check(&self, key: &str) -> RateLimitResult {
        if !self.enabled {
            return RateLimitResult::Allowed { remaining: None };
        }

        let mut buckets = self.buckets.write();
        if buckets.len() >= self.max_buckets && !buckets.contains_key(key) {
            self.evict(&mut buckets);
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.spec));

        if bucket.try_acquire() {
            RateLimitResult::Allowed {
                remaining: Some(bucket.available.floor() as u32),
            }
        } else {
            RateLimitResult::Limited {
                retry_after: bucket.time_to_next_token(),
            }
        }
    }
}

/// Token bucket
struct TokenBucket {
    available: f64,
    max: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn new(spec: RateSpec) -> Self {
        Self {
            available: spec.requests as f64,
            max: spec.requests as f64,
            refill_per_sec: spec.refill_per_sec(),
            last_refill: Instant::now(),
            last_seen: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        self.last_seen = Instant::now();
        self.refill();
        if self.available >= 1.0 {
            self.available -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.refill_per_sec).min(self.max);
        self.last_refill = now;
    }

    fn is_full(&mut self) -> bool {
        self.refill();
        self.available >= self.max
    }

    fn time_to_next_token(&self) -> Duration {
        let missing = (1.0 - self.available).max(0.0);
        Duration::from_secs_f64(missing / self.refill_per_sec)
    }
}

/// Rate limit result
#[derive(Debug)]
pub enum RateLimitResult {
    Allowed { remaining: Option<u32> },
    Limited { retry_after: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(requests: u32, secs: u64) -> RateSpec {
        RateSpec { requests, period: Duration::from_secs(secs) }
    }

    #[test]
    fn test_blocks_after_capacity() {
        let limiter = RateLimiter::new(spec(3, 3600), true);
        for _ in 0..3 {
            assert!(matches!(limiter.check("10.0.0.1"), RateLimitResult::Allowed { .. }));
        }
        match limiter.check("10.0.0.1") {
            RateLimitResult::Limited { retry_after } => {
                assert!(retry_after > Duration::from_secs(1));
            }
            other => panic!("expected limit, got {:?}", other),
        }

        // Other clients keep their own budget
        assert!(matches!(limiter.check("10.0.0.2"), RateLimitResult::Allowed { .. }));
    }

    #[test]
    fn test_refills_over_time() {
        let limiter = RateLimiter::new(spec(20, 1), true);
        for _ in 0..20 {
            limiter.check("client");
        }
        assert!(matches!(limiter.check("client"), RateLimitResult::Limited { .. }));

        std::thread::sleep(Duration::from_millis(150));
        assert!(matches!(limiter.check("client"), RateLimitResult::Allowed { .. }));
    }

    #[test]
    fn test_disabled_always_allows() {
        let limiter = RateLimiter::new(spec(1, 3600), false);
        for _ in 0..10 {
            assert!(matches!(
                limiter.check("client"),
                RateLimitResult::Allowed { remaining: None }
            ));
        }
    }

    #[test]
    fn test_client_key_from_forwarded_for() {
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "203.0.113.7");

        let req = axum::http::Request::builder().body(axum::body::Body::empty()).unwrap();
        assert_eq!(client_key(&req), "unknown");
    }

    #[test]
    fn test_busy_clients_evict_least_recent() {
        let limiter = RateLimiter::new(spec(5, 3600), true).with_max_buckets(2);

        // Both clients have spent tokens, so neither bucket is full
        limiter.check("10.0.0.1");
        std::thread::sleep(Duration::from_millis(5));
        limiter.check("10.0.0.2");
        limiter.check("10.0.0.3");

        let buckets = limiter.buckets.read();
        assert!(buckets.len() <= 2);
        assert!(!buckets.contains_key("10.0.0.1"));
        assert!(buckets.contains_key("10.0.0.3"));
    }
}
