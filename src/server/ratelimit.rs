//! Rate limiting middleware
//!
//! Per-client IP rate limiting using a fixed window counter with a hard
//! block on violation.
//!
//! Behavior:
//! - Each client IP gets a counter that resets every window (default 60s)
//! - Exceeding the per-window request cap (default 100) blocks the IP for
//!   a fixed duration (default 5 minutes)
//! - Blocked requests receive HTTP 429 with a `retryAfter` hint
//!
//! State is in-memory only; a process restart resets all counters.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::envelope::{Envelope, ErrorCode};
use crate::logging::targets;

/// Default requests allowed per window
const DEFAULT_MAX_REQUESTS: u32 = 100;

/// Default window length
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default block duration after exceeding the window cap
const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(300);

/// Default cleanup interval (remove stale entries)
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Default entry expiry time for idle, unblocked clients
const DEFAULT_ENTRY_EXPIRY: Duration = Duration::from_secs(600);

/// Rate limit errors
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded")]
    LimitExceeded { retry_after_secs: u64 },
}

/// Fixed window counter state for a single client
#[derive(Debug, Clone)]
struct WindowState {
    /// Start of the current counting window
    window_start: Instant,
    /// Requests seen in the current window
    count: u32,
    /// If set, all requests are rejected until this instant
    blocked_until: Option<Instant>,
}

impl WindowState {
    fn new() -> Self {
        WindowState {
            window_start: Instant::now(),
            count: 0,
            blocked_until: None,
        }
    }

    /// Record one request against the window.
    ///
    /// Returns the remaining request budget, or the time until requests are
    /// accepted again when the client is over the limit.
    fn try_record(
        &mut self,
        max_requests: u32,
        window: Duration,
        block_duration: Duration,
    ) -> Result<u32, Duration> {
        let now = Instant::now();

        // An active block takes precedence over window accounting
        if let Some(until) = self.blocked_until {
            if now < until {
                return Err(until - now);
            }
            // Block has lapsed, start over with a fresh window
            self.blocked_until = None;
            self.window_start = now;
            self.count = 0;
        }

        // Window rollover
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.count = 0;
        }

        self.count += 1;
        if self.count > max_requests {
            self.blocked_until = Some(now + block_duration);
            return Err(block_duration);
        }

        Ok(max_requests - self.count)
    }

    /// Whether the client is currently inside a block period
    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
    /// How long to block a client after it exceeds the window cap
    pub block_duration: Duration,
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Trusted proxy headers for client IP extraction
    pub trust_proxy_headers: bool,
    /// Cleanup interval for stale entries
    pub cleanup_interval: Duration,
    /// Entry expiry time for idle clients
    pub entry_expiry: Duration,
    /// Exempt IPs (e.g., health probes)
    pub exempt_ips: Vec<IpAddr>,
    /// Whether to exempt loopback addresses.
    ///
    /// Off by default: the gateway usually binds loopback, so exempting it
    /// would disable the limiter entirely for local deployments.
    pub exempt_loopback: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
            block_duration: DEFAULT_BLOCK_DURATION,
            enabled: true,
            trust_proxy_headers: false,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            entry_expiry: DEFAULT_ENTRY_EXPIRY,
            exempt_ips: Vec::new(),
            exempt_loopback: false,
        }
    }
}

impl RateLimitConfig {
    /// Create a builder for custom configuration
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Check if an IP is exempt from rate limiting
    pub fn is_exempt(&self, ip: &IpAddr) -> bool {
        if self.exempt_loopback && ip.is_loopback() {
            return true;
        }
        self.exempt_ips.contains(ip)
    }
}

/// Builder for RateLimitConfig
#[derive(Default)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    /// Set the per-window request cap
    pub fn max_requests(mut self, max: u32) -> Self {
        self.config.max_requests = max;
        self
    }

    /// Set the window length
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Set the block duration
    pub fn block_duration(mut self, duration: Duration) -> Self {
        self.config.block_duration = duration;
        self
    }

    /// Enable or disable rate limiting
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Trust proxy headers for client IP
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.config.trust_proxy_headers = trust;
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Set entry expiry
    pub fn entry_expiry(mut self, expiry: Duration) -> Self {
        self.config.entry_expiry = expiry;
        self
    }

    /// Add exempt IPs
    pub fn exempt_ips(mut self, ips: Vec<IpAddr>) -> Self {
        self.config.exempt_ips = ips;
        self
    }

    /// Set whether to exempt loopback
    pub fn exempt_loopback(mut self, exempt: bool) -> Self {
        self.config.exempt_loopback = exempt;
        self
    }

    /// Build the configuration
    pub fn build(self) -> RateLimitConfig {
        self.config
    }
}

/// Client window entry with expiry tracking
#[derive(Debug)]
struct ClientEntry {
    window: WindowState,
    last_seen: Instant,
}

/// Rate limiter state
#[derive(Clone)]
pub struct RateLimiter {
    /// Per-client windows keyed by IP
    entries: Arc<RwLock<HashMap<IpAddr, ClientEntry>>>,
    /// Configuration
    config: Arc<RateLimitConfig>,
    /// Last cleanup time
    last_cleanup: Arc<RwLock<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            last_cleanup: Arc::new(RwLock::new(Instant::now())),
        }
    }

    /// Check if a request is allowed. Returns the remaining budget in the
    /// current window on success.
    pub fn check(&self, client_ip: IpAddr) -> Result<u32, RateLimitError> {
        if !self.config.enabled {
            return Ok(self.config.max_requests);
        }

        // Check exemptions
        if self.config.is_exempt(&client_ip) {
            return Ok(self.config.max_requests);
        }

        // Periodic cleanup
        self.maybe_cleanup();

        // Check/update window
        let mut entries = self.entries.write();
        let entry = entries.entry(client_ip).or_insert_with(|| ClientEntry {
            window: WindowState::new(),
            last_seen: Instant::now(),
        });

        entry.last_seen = Instant::now();

        entry
            .window
            .try_record(
                self.config.max_requests,
                self.config.window,
                self.config.block_duration,
            )
            .map_err(|retry_after| RateLimitError::LimitExceeded {
                retry_after_secs: retry_after.as_secs().max(1),
            })
    }

    /// Maybe run cleanup of stale entries.
    ///
    /// Blocked entries are always retained until their block lapses,
    /// regardless of idle time.
    fn maybe_cleanup(&self) {
        let mut last_cleanup = self.last_cleanup.write();
        if last_cleanup.elapsed() < self.config.cleanup_interval {
            return;
        }

        *last_cleanup = Instant::now();
        drop(last_cleanup);

        let mut entries = self.entries.write();
        let expiry = self.config.entry_expiry;
        let now = Instant::now();
        entries.retain(|_, entry| entry.window.is_blocked(now) || entry.last_seen.elapsed() < expiry);

        debug!(target: targets::HTTP, "Rate limiter cleanup: {} entries remaining", entries.len());
    }

    /// Get current limiter stats for monitoring
    pub fn stats(&self) -> RateLimiterStats {
        let entries = self.entries.read();
        let now = Instant::now();
        RateLimiterStats {
            tracked_ips: entries.len(),
            blocked_ips: entries
                .values()
                .filter(|e| e.window.is_blocked(now))
                .count(),
            config_enabled: self.config.enabled,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub tracked_ips: usize,
    pub blocked_ips: usize,
    pub config_enabled: bool,
}

/// Extract client IP from request
fn extract_client_ip(
    remote_addr: Option<SocketAddr>,
    headers: &axum::http::HeaderMap,
    trust_proxy: bool,
) -> Option<IpAddr> {
    // If trusting proxy headers, check X-Forwarded-For first
    if trust_proxy {
        if let Some(xff) = headers.get("x-forwarded-for") {
            if let Ok(xff_str) = xff.to_str() {
                // Take the first (leftmost) IP, which is the original client
                if let Some(ip_str) = xff_str.split(',').next() {
                    if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                        return Some(ip);
                    }
                }
            }
        }

        // Also check X-Real-IP
        if let Some(real_ip) = headers.get("x-real-ip") {
            if let Ok(ip_str) = real_ip.to_str() {
                if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    // Fall back to direct connection address
    remote_addr.map(|addr| addr.ip())
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    limiter: axum::extract::State<RateLimiter>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let config = limiter.config();

    // Skip if disabled
    if !config.enabled {
        return next.run(request).await;
    }

    let headers = request.headers();
    let remote_addr = connect_info.map(|ci| ci.0);

    // Extract client IP
    let client_ip = match extract_client_ip(remote_addr, headers, config.trust_proxy_headers) {
        Some(ip) => ip,
        None => {
            // Can't determine client IP - allow request but log warning
            warn!(target: targets::HTTP, "Rate limit: Could not determine client IP");
            return next.run(request).await;
        }
    };

    // Check rate limit
    match limiter.check(client_ip) {
        Ok(remaining) => {
            let mut response = next.run(request).await;
            add_rate_limit_headers(response.headers_mut(), config.max_requests, remaining);
            response
        }
        Err(RateLimitError::LimitExceeded { retry_after_secs }) => {
            warn!(
                target: targets::HTTP,
                "Rate limit exceeded for {} (retry after {}s)",
                client_ip, retry_after_secs
            );
            rate_limit_exceeded_response(retry_after_secs)
        }
    }
}

/// Add rate limit headers to response
fn add_rate_limit_headers(headers: &mut axum::http::HeaderMap, limit: u32, remaining: u32) {
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
}

/// Generate the 429 response envelope
fn rate_limit_exceeded_response(retry_after_secs: u64) -> Response<Body> {
    let envelope = Envelope::fail_with_details(
        ErrorCode::RateLimited,
        "Too many requests. Please try again later.",
        vec![json!({ "retryAfter": retry_after_secs })],
    )
    .with_meta("retryAfter", json!(retry_after_secs));

    let mut response = envelope.into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}
