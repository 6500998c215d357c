//! Fixed-window rate limiting middleware.
//!
//! Each client key (the client IP, taken from trusted proxy headers or the
//! connection address) gets a counter and a window start. Every request
//! increments the counter; once it passes `max_requests` the request is
//! rejected with `429` until the window elapses and the counter resets.
//!
//! Bursts straddling a window boundary can briefly see up to twice the limit.
//! State is local to the process.
//!
//! # Example
//!
//! ```rust,ignore
//! use folio_core::middleware::rate_limit::{RateLimitLayer, RateLimitConfig, RateLimiter};
//!
//! let config = RateLimitConfig::builder()
//!     .window(Duration::from_secs(60))
//!     .max_requests(100)
//!     .build();
//!
//! let app = Router::new()
//!     .route("/api/works", get(list_works))
//!     .layer(RateLimitLayer::new(Arc::new(RateLimiter::new(config))));
//! ```

use crate::error::ApiError;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, HeaderValue, Request},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use futures::future::BoxFuture;
use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::debug;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Rate limiting errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("You can only make {limit} requests every {window_ms}ms")]
    Exceeded {
        limit: u64,
        window_ms: u64,
        retry_after_secs: u64,
    },
}

impl From<RateLimitError> for ApiError {
    fn from(error: RateLimitError) -> Self {
        ApiError::too_many_requests(error.to_string())
    }
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let RateLimitError::Exceeded {
            limit,
            retry_after_secs,
            ..
        } = self.clone();

        let mut response = ApiError::from(self).into_response();
        let headers = response.headers_mut();
        headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u64));
        headers.insert("Retry-After", HeaderValue::from(retry_after_secs));
        response
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Window length
    pub window: Duration,

    /// Requests admitted per client per window
    pub max_requests: u64,

    /// Headers consulted for the client IP, first match wins. Empty keys
    /// clients by the socket peer; only list headers a fronting proxy sets.
    pub trusted_proxy_headers: Vec<String>,

    /// IPs exempt from rate limiting
    pub ip_whitelist: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_millis(60_000),
            max_requests: 100,
            trusted_proxy_headers: Vec::new(),
            ip_whitelist: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Create a new builder for rate limit configuration.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Window length in whole milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

/// Builder for rate limit configuration.
#[derive(Debug, Default)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    pub fn max_requests(mut self, max: u64) -> Self {
        self.config.max_requests = max;
        self
    }

    pub fn trusted_proxy_headers(mut self, headers: Vec<String>) -> Self {
        self.config.trusted_proxy_headers = headers;
        self
    }

    pub fn ip_whitelist(mut self, ips: Vec<IpAddr>) -> Self {
        self.config.ip_whitelist = ips;
        self
    }

    pub fn build(self) -> RateLimitConfig {
        self.config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fixed Window Counter
// ═══════════════════════════════════════════════════════════════════════════════

/// Counter for one client's current window.
#[derive(Debug, Clone)]
struct WindowEntry {
    count: u64,
    window_start: Instant,
}

impl WindowEntry {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Count a hit, starting a fresh window if the current one elapsed.
    fn hit(&mut self, window: Duration) -> u64 {
        if self.window_start.elapsed() >= window {
            self.count = 0;
            self.window_start = Instant::now();
        }
        self.count += 1;
        self.count
    }

    fn remaining_in_window(&self, window: Duration) -> Duration {
        window.saturating_sub(self.window_start.elapsed())
    }

    fn is_expired(&self, window: Duration) -> bool {
        self.window_start.elapsed() >= window
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rate Limiter State
// ═══════════════════════════════════════════════════════════════════════════════

/// Client identifier for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientId {
    Ip(IpAddr),
    Anonymous,
}

/// Rate limit check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Current limit
    pub limit: u64,

    /// Remaining requests in this window
    pub remaining: u64,

    /// Time until the window resets
    pub reset_after: Duration,
}

/// In-memory fixed-window rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<ClientId, RwLock<WindowEntry>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn is_whitelisted(&self, client_id: &ClientId) -> bool {
        match client_id {
            ClientId::Ip(ip) => self.config.ip_whitelist.contains(ip),
            ClientId::Anonymous => false,
        }
    }

    /// Record a request from `client_id` and decide whether to admit it.
    pub fn check(&self, client_id: &ClientId) -> RateLimitResult {
        let limit = self.config.max_requests;
        let window = self.config.window;

        if !self.config.enabled || self.is_whitelisted(client_id) {
            return RateLimitResult {
                allowed: true,
                limit,
                remaining: limit,
                reset_after: window,
            };
        }

        let entry = self
            .windows
            .entry(client_id.clone())
            .or_insert_with(|| RwLock::new(WindowEntry::new()));
        let mut counter = entry.write();
        let count = counter.hit(window);

        RateLimitResult {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_after: counter.remaining_in_window(window),
        }
    }

    /// Like [`check`](Self::check), but as an error for rejected requests.
    pub fn admit(&self, client_id: &ClientId) -> Result<RateLimitResult, RateLimitError> {
        let result = self.check(client_id);
        if result.allowed {
            return Ok(result);
        }
        Err(RateLimitError::Exceeded {
            limit: result.limit,
            window_ms: self.config.window_ms(),
            retry_after_secs: result.reset_after.as_secs_f64().ceil().max(1.0) as u64,
        })
    }

    /// Drop counters whose window has elapsed.
    pub fn cleanup_expired(&self) -> usize {
        let window = self.config.window;
        let before = self.windows.len();
        self.windows.retain(|_, entry| !entry.read().is_expired(window));
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked clients.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client ID Extraction
// ═══════════════════════════════════════════════════════════════════════════════

/// Extract client ID from request.
pub fn extract_client_id(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    config: &RateLimitConfig,
) -> ClientId {
    extract_client_ip(headers, remote_addr, config)
        .map(ClientId::Ip)
        .unwrap_or(ClientId::Anonymous)
}

/// Extract client IP from headers and connection info.
fn extract_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    config: &RateLimitConfig,
) -> Option<IpAddr> {
    for header_name in &config.trusted_proxy_headers {
        if let Some(value) = headers.get(header_name) {
            if let Ok(s) = value.to_str() {
                // X-Forwarded-For can contain multiple IPs, take the first (client)
                let ip_str = s.split(',').next().unwrap_or(s).trim();
                if let Ok(ip) = ip_str.parse() {
                    return Some(ip);
                }
            }
        }
    }

    remote_addr.map(|addr| addr.ip())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Rate limiting layer for Tower.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    /// Create a new rate limit layer.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    /// Create from configuration.
    pub fn from_config(config: RateLimitConfig) -> Self {
        Self::new(Arc::new(RateLimiter::new(config)))
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let remote_addr = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0);
            let client_id = extract_client_id(request.headers(), remote_addr, limiter.config());

            match limiter.admit(&client_id) {
                Ok(result) => {
                    let mut response = inner.call(request).await?;
                    let headers = response.headers_mut();
                    headers.insert("X-RateLimit-Limit", HeaderValue::from(result.limit));
                    headers.insert("X-RateLimit-Remaining", HeaderValue::from(result.remaining));
                    Ok(response)
                }
                Err(e) => {
                    debug!(client = ?client_id, "Rate limit exceeded");
                    counter!("folio_rate_limit_rejections_total").increment(1);
                    Ok(e.into_response())
                }
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Background Cleanup Task
// ═══════════════════════════════════════════════════════════════════════════════

/// Start background cleanup task for expired rate limit entries.
pub fn start_cleanup_task(limiter: Arc<RateLimiter>, interval: Duration) {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        loop {
            interval_timer.tick().await;
            let removed = limiter.cleanup_expired();
            if removed > 0 {
                debug!(removed = removed, "Cleaned up expired rate limit windows");
            }
        }
    });
}
