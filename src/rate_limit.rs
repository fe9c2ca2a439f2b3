/*!
 * Rate Limiting
 * Fixed-window request counter keyed by client IP
 */
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    /// Seconds until the window resets, never zero.
    Limited { retry_after: u64 },
}

/// Per-process limiter. Counters live in memory only; nothing is shared
/// across instances.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    trust_proxy: bool,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests.max(1),
            window: config.window,
            trust_proxy: config.trust_proxy,
            windows: DashMap::new(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// Count one request from `key` at `now`. An expired window restarts at
    /// a count of one.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + self.window,
            });
        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }
        entry.count = entry.count.saturating_add(1);

        if entry.count > self.max_requests {
            let remaining = entry.reset_at.saturating_duration_since(now);
            RateDecision::Limited {
                retry_after: remaining.as_secs_f64().ceil().max(1.0) as u64,
            }
        } else {
            RateDecision::Allowed {
                remaining: self.max_requests - entry.count,
            }
        }
    }

    /// Drop windows whose reset deadline has passed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.reset_at > now);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// The counter key for a request: the first `x-forwarded-for` hop when
    /// proxies are trusted, otherwise the peer address.
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Middleware guarding a route group with the shared limiter.
pub async fn limit_requests(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = limiter.client_key(request.headers(), peer);

    match limiter.check(&key) {
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("ratelimit-limit", HeaderValue::from(limiter.max_requests()));
            headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        RateDecision::Limited { retry_after } => {
            tracing::warn!(client = %key, retry_after, "Rate limit exceeded");
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            window: Duration::from_secs(window_secs),
            max_requests: max,
            trust_proxy: false,
        })
    }

    #[test]
    fn test_exactly_max_requests_succeed() {
        let limiter = limiter(3, 60);
        let start = Instant::now();
        for expected_remaining in [2, 1, 0] {
            assert_eq!(
                limiter.check_at("1.2.3.4", start),
                RateDecision::Allowed {
                    remaining: expected_remaining
                }
            );
        }
        match limiter.check_at("1.2.3.4", start + Duration::from_secs(10)) {
            RateDecision::Limited { retry_after } => assert_eq!(retry_after, 50),
            other => panic!("expected limited, got {:?}", other),
        }
    }

    #[test]
    fn test_window_reset_starts_fresh_count() {
        let limiter = limiter(1, 60);
        let start = Instant::now();
        assert!(matches!(limiter.check_at("ip", start), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check_at("ip", start), RateDecision::Limited { .. }));

        let later = start + Duration::from_secs(60);
        assert_eq!(
            limiter.check_at("ip", later),
            RateDecision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn test_retry_after_is_never_zero() {
        let limiter = limiter(1, 1);
        let start = Instant::now();
        limiter.check_at("ip", start);
        let almost = start + Duration::from_millis(999);
        assert_eq!(
            limiter.check_at("ip", almost),
            RateDecision::Limited { retry_after: 1 }
        );
    }

    #[test]
    fn test_clients_are_counted_separately() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        assert!(matches!(limiter.check_at("a", now), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check_at("b", now), RateDecision::Allowed { .. }));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_sweep_evicts_expired_windows() {
        let limiter = limiter(5, 60);
        let now = Instant::now();
        limiter.check_at("old", now);
        limiter.check_at("new", now + Duration::from_secs(30));
        assert_eq!(limiter.sweep(now + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_client_key_respects_trust_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let peer = Some(SocketAddr::from(([10, 0, 0, 1], 5000)));

        let direct = limiter(1, 60);
        assert_eq!(direct.client_key(&headers, peer), "10.0.0.1");

        let proxied = RateLimiter::new(&RateLimitConfig {
            trust_proxy: true,
            ..RateLimitConfig::default()
        });
        assert_eq!(proxied.client_key(&headers, peer), "203.0.113.7");
        assert_eq!(proxied.client_key(&HeaderMap::new(), None), "unknown");
    }

    #[tokio::test]
    async fn test_middleware_returns_429_after_limit() {
        let limiter = Arc::new(limiter(2, 60));
        let app = Router::new()
            .route("/api/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn_with_state(limiter, limit_requests))
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 12345))));

        for _ in 0..2 {
            let res = app
                .clone()
                .oneshot(Request::get("/api/ping").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert!(res.headers().contains_key("ratelimit-remaining"));
        }

        let res = app
            .oneshot(Request::get("/api/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["retryAfter"].as_u64().unwrap() > 0);
    }
}
