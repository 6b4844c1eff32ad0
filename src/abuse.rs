//! Anti-abuse protection
//!
//! - Blocks crawlers (they have no business on a game server)
//! - Limits WebSocket (re)connects per token
//! - Limits submissions per player (checked in the submission handlers)

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// Fixed-window rate limiter keyed by an arbitrary string
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Map of key to (request count, window start)
    requests: Arc<RwLock<HashMap<String, (u32, Instant)>>>,
    /// Maximum requests per window
    max_requests: u32,
    /// Time window duration
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(10))
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Check if a request should be allowed
    /// Returns true if allowed, false if rate limited
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        match requests.get_mut(key) {
            Some((count, window_start)) => {
                if now.duration_since(*window_start) >= self.window {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_requests {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                requests.insert(key.to_string(), (1, now));
                true
            }
        }
    }

    /// Drop entries whose window is long gone. Returns how many remain.
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        requests.retain(|_, (_, window_start)| now.duration_since(*window_start) < self.window * 2);
        requests.len()
    }
}

/// Anti-abuse configuration
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    pub block_crawlers: bool,
    /// Per-player submission limiter (None = disabled)
    pub submission_limiter: Option<RateLimiter>,
    /// Per-token WebSocket connect limiter (None = disabled)
    pub connection_limiter: Option<RateLimiter>,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            block_crawlers: true,
            submission_limiter: Some(RateLimiter::default()),
            connection_limiter: Some(RateLimiter::new(10, Duration::from_secs(10))),
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(default)
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AbuseConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let block_crawlers = env_flag("ABUSE_BLOCK_CRAWLERS", true);
        let rate_limit_enabled = env_flag("ABUSE_RATE_LIMIT", true);

        let (submission_limiter, connection_limiter) = if rate_limit_enabled {
            let window = Duration::from_secs(env_number("ABUSE_RATE_LIMIT_WINDOW", 10));
            (
                Some(RateLimiter::new(
                    env_number("ABUSE_RATE_LIMIT_MAX", 30),
                    window,
                )),
                Some(RateLimiter::new(
                    env_number("ABUSE_CONNECT_LIMIT_MAX", 10),
                    window,
                )),
            )
        } else {
            (None, None)
        };

        tracing::info!(block_crawlers, rate_limit_enabled, "Anti-abuse config loaded");

        Self {
            block_crawlers,
            submission_limiter,
            connection_limiter,
        }
    }
}

/// Check if a user agent looks like a crawler
fn is_crawler(user_agent: &str) -> bool {
    let ua_lower = user_agent.to_lowercase();
    // "bot" as a word boundary, not substring
    ua_lower.ends_with("bot")
        || ua_lower.contains("bot/")
        || ua_lower.contains("bot ")
        || ua_lower.contains("spider")
        || ua_lower.contains("crawler")
}

/// Rate limit key for a WebSocket upgrade. Anonymous observers are not limited.
fn connection_key(request: &Request<Body>) -> Option<String> {
    let query = request.uri().query()?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(|token| format!("token:{}", token))
}

fn rate_limited() -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "10")],
        "Rate limit exceeded. Please slow down.",
    )
        .into_response()
}

/// Middleware for anti-abuse protection on the public routes
pub async fn abuse_middleware(
    State(config): State<Arc<AbuseConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if config.block_crawlers {
        let ua = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|ua| ua.to_str().ok())
            .unwrap_or_default();
        if is_crawler(ua) {
            tracing::warn!(user_agent = ua, "Blocked crawler");
            return (StatusCode::FORBIDDEN, "Access denied").into_response();
        }
    }

    if request.uri().path() == "/ws" {
        if let (Some(limiter), Some(key)) = (&config.connection_limiter, connection_key(&request))
        {
            if !limiter.check(&key).await {
                tracing::warn!(key, "Connection rate limited");
                return rate_limited();
            }
        }
    }

    next.run(request).await
}
