//! HTTP server implementation
//!
//! Implements:
//! - Dispatch API (POST /execute, POST /batch)
//! - Discovery API (GET /functions, GET /functions/:category/:function)
//! - Admin API (DELETE /cache, bearer token)
//! - Health and stats (GET /health, /health/ready, /stats)
//! - Temp file retrieval (GET /temp/:file_id)
//! - Rate limiting middleware

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth;
use crate::dispatch::Dispatcher;
use crate::envelope::{Envelope, ErrorCode};
use crate::logging::targets;
use crate::server::health::HealthChecker;
use crate::server::ratelimit::{rate_limit_middleware, RateLimitConfig, RateLimiter};
use crate::storage::StoreError;

/// Default max body size for JSON endpoints (256KB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 262144;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Admin bearer token for DELETE /cache. Unset disables the endpoint.
    pub admin_token: Option<String>,
    /// Max body size for JSON endpoints in bytes
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            admin_token: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Build an `HttpConfig` from the loaded JSON configuration.
///
/// Maps gateway.* and limits.* keys from config and checks
/// SWITCHBOARD_ADMIN_TOKEN, with env taking precedence over config.
pub fn build_http_config(cfg: &Value) -> HttpConfig {
    let cfg_token = cfg
        .get("gateway")
        .and_then(|g| g.get("adminToken"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let admin_token = std::env::var("SWITCHBOARD_ADMIN_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
        .or(cfg_token);

    let max_body_bytes = cfg
        .get("limits")
        .and_then(|l| l.get("bodyLimitBytes"))
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);

    HttpConfig {
        admin_token,
        max_body_bytes,
    }
}

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HttpConfig>,
    /// Request dispatcher (owns the registry and temp store)
    pub dispatcher: Arc<Dispatcher>,
    /// Health checker for deep diagnostics
    pub health_checker: Arc<HealthChecker>,
    /// Rate limiter handle, kept for /stats (None when disabled)
    pub rate_limiter: Option<RateLimiter>,
    /// Gateway start time (Unix timestamp)
    pub start_time: i64,
}

/// Middleware configuration for the HTTP server
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Whether to enable rate limiting middleware
    pub enable_rate_limit: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        MiddlewareConfig {
            rate_limit: RateLimitConfig::default(),
            enable_rate_limit: true,
        }
    }
}

impl MiddlewareConfig {
    /// Create a configuration with all middleware disabled (for testing)
    pub fn none() -> Self {
        MiddlewareConfig {
            rate_limit: RateLimitConfig::default(),
            enable_rate_limit: false,
        }
    }

    /// Create a configuration with all middleware enabled
    pub fn full() -> Self {
        MiddlewareConfig {
            rate_limit: RateLimitConfig::default(),
            enable_rate_limit: true,
        }
    }
}

/// Create the HTTP router without middleware (for handler tests)
pub fn create_router(config: HttpConfig, dispatcher: Arc<Dispatcher>) -> Router {
    create_router_with_state(config, MiddlewareConfig::none(), dispatcher)
}

/// Create the HTTP router with all endpoints and middleware
pub fn create_router_with_state(
    config: HttpConfig,
    middleware_config: MiddlewareConfig,
    dispatcher: Arc<Dispatcher>,
) -> Router {
    let start_time = chrono::Utc::now().timestamp();

    let health_checker = Arc::new(HealthChecker::new(
        dispatcher.store().config().base_dir.clone(),
    ));

    let rate_limiter = if middleware_config.enable_rate_limit {
        Some(RateLimiter::new(middleware_config.rate_limit.clone()))
    } else {
        None
    };

    let max_body_bytes = config.max_body_bytes;
    let state = AppState {
        config: Arc::new(config),
        dispatcher,
        health_checker,
        rate_limiter: rate_limiter.clone(),
        start_time,
    };

    let router: Router<AppState> = Router::new()
        .route("/execute", post(execute_handler))
        .route("/batch", post(batch_handler))
        .route("/functions", get(list_functions_handler))
        .route(
            "/functions/:category/:function",
            get(describe_function_handler),
        )
        .route("/cache", delete(clear_cache_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(health_handler))
        .route("/health/ready", get(health_ready_handler))
        .route("/stats", get(stats_handler))
        .route("/temp/:file_id", get(temp_file_handler))
        .fallback(fallback_handler)
        .layer(DefaultBodyLimit::max(max_body_bytes));

    let mut stateless_router: Router = router.with_state(state);

    // Rate limiting middleware (rejects overloaded clients before handlers)
    if let Some(limiter) = rate_limiter {
        stateless_router = stateless_router.layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    stateless_router
}

/// Request ID for response metadata: honor x-request-id, else mint a UUID.
fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ============================================================================
// Dispatch API
// ============================================================================

/// POST /execute - Dispatch a single function request
async fn execute_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_from(&headers);

    // Manual parse so malformed JSON gets a validation envelope, not a 422
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(target: targets::HTTP, request_id = %request_id, error = %e, "Rejected unparseable execute body");
            return Envelope::fail_with_details(
                ErrorCode::ValidationFailed,
                "Request body must be valid JSON",
                vec![json!({"message": e.to_string()})],
            )
            .with_meta("requestId", Value::String(request_id))
            .into_response();
        }
    };

    state
        .dispatcher
        .execute_value(raw, &request_id)
        .await
        .into_response()
}

/// POST /batch - Dispatch up to 10 requests with failure isolation
async fn batch_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = request_id_from(&headers);

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(target: targets::HTTP, request_id = %request_id, error = %e, "Rejected unparseable batch body");
            return Envelope::fail_with_details(
                ErrorCode::ValidationFailed,
                "Request body must be valid JSON",
                vec![json!({"message": e.to_string()})],
            )
            .with_meta("requestId", Value::String(request_id))
            .into_response();
        }
    };

    let requests = match raw.get("requests").and_then(|v| v.as_array()) {
        Some(items) => items.clone(),
        None => {
            return Envelope::fail_with_details(
                ErrorCode::ValidationFailed,
                "Body must contain a requests array",
                vec![json!({
                    "field": "requests",
                    "code": "required",
                    "message": "expected an array of execute requests",
                })],
            )
            .with_meta("requestId", Value::String(request_id))
            .into_response();
        }
    };

    state
        .dispatcher
        .execute_batch(requests, &request_id)
        .await
        .into_response()
}

// ============================================================================
// Discovery API
// ============================================================================

/// GET /functions - List registered functions grouped by category
async fn list_functions_handler(State(state): State<AppState>) -> Response {
    let registry = state.dispatcher.registry();
    let mut categories = serde_json::Map::new();
    for (category, descriptors) in registry.by_category() {
        let items: Vec<Value> = descriptors
            .iter()
            .map(|d| serde_json::to_value(d).unwrap_or(Value::Null))
            .collect();
        categories.insert(category, Value::Array(items));
    }

    Envelope::ok(
        format!("{} functions registered", registry.len()),
        json!({
            "total": registry.len(),
            "categories": Value::Object(categories),
        }),
    )
    .into_response()
}

/// GET /functions/:category/:function - Describe one function
async fn describe_function_handler(
    State(state): State<AppState>,
    Path((category, function)): Path<(String, String)>,
) -> Response {
    let registry = state.dispatcher.registry();
    let Some(descriptor) = registry.descriptor(&category, &function) else {
        return Envelope::fail(
            ErrorCode::FunctionNotFound,
            format!("Function {}:{} is not registered", category, function),
        )
        .into_response();
    };

    let key = descriptor.key();
    let stats = registry.stats_snapshot().remove(&key);
    let mut data = json!({
        "function": serde_json::to_value(descriptor).unwrap_or(Value::Null),
    });
    if let Some(stats) = stats {
        data["stats"] = json!({
            "calls": stats.calls,
            "errors": stats.errors,
            "averageDurationMs": stats.average_duration_ms(),
            "lastInvokedAt": stats.last_invoked_at,
        });
    }

    Envelope::ok(format!("Function {}", key), data).into_response()
}

// ============================================================================
// Admin API
// ============================================================================

/// DELETE /cache - Clear the handler instance cache (admin only)
async fn clear_cache_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !auth::check_admin_token(&headers, state.config.admin_token.as_deref()) {
        warn!(target: targets::HTTP, "Rejected cache clear without valid admin token");
        return Envelope::fail(
            ErrorCode::Unauthorized,
            "Admin token required to clear the cache",
        )
        .into_response();
    }

    let cleared = state.dispatcher.registry().clear_cache();
    debug!(target: targets::HTTP, cleared, "Handler cache cleared");
    Envelope::ok(
        "Handler instance cache cleared",
        json!({ "cleared": cleared }),
    )
    .into_response()
}

// ============================================================================
// Health and Stats
// ============================================================================

/// GET /health - Lightweight liveness probe for container orchestrators.
async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
        })),
    )
        .into_response()
}

/// GET /health/ready - Readiness probe.
///
/// Checks that temp storage is writable. Returns 200 if ready, 503 if not.
async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    let ready = state.health_checker.is_ready();

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
        })),
    )
        .into_response()
}

/// GET /stats - Usage counters and system diagnostics
async fn stats_handler(State(state): State<AppState>) -> Response {
    let registry = state.dispatcher.registry();
    let store = state.dispatcher.store();
    let counters = state.dispatcher.counters_snapshot();
    let diagnostics = state.health_checker.gather_diagnostics();
    let uptime = chrono::Utc::now().timestamp() - state.start_time;

    let functions: serde_json::Map<String, Value> = registry
        .stats_snapshot()
        .into_iter()
        .map(|(key, stats)| {
            let value = json!({
                "calls": stats.calls,
                "errors": stats.errors,
                "averageDurationMs": stats.average_duration_ms(),
                "lastInvokedAt": stats.last_invoked_at,
            });
            (key, value)
        })
        .collect();

    let mut data = json!({
        "uptimeSeconds": uptime,
        "requests": serde_json::to_value(counters).unwrap_or(Value::Null),
        "registry": {
            "registered": registry.len(),
            "cachedInstances": registry.cached_count(),
        },
        "functions": Value::Object(functions),
        "storage": {
            "fileCount": store.file_count(),
            "totalSizeBytes": store.total_size(),
            "maxTotalBytes": store.config().max_total_size,
        },
    });

    if let Some(limiter) = &state.rate_limiter {
        let stats = limiter.stats();
        data["rateLimiter"] = json!({
            "trackedIps": stats.tracked_ips,
            "blockedIps": stats.blocked_ips,
            "enabled": stats.config_enabled,
        });
    }
    if let Some(rss) = diagnostics.memory_rss_bytes {
        data["memoryRssBytes"] = Value::from(rss);
    }
    if let Some(fds) = diagnostics.open_fds {
        data["openFds"] = Value::from(fds);
    }

    Envelope::ok("Gateway statistics", data).into_response()
}

// ============================================================================
// Temp File Retrieval
// ============================================================================

/// GET /temp/:file_id - Serve a stored temp file
async fn temp_file_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Response {
    let store = state.dispatcher.store();
    match store.read(&file_id).await {
        Ok((content, meta)) => {
            let disposition = format!("attachment; filename=\"{}\"", sanitize_filename(&meta.filename));
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, meta.mime_type),
                    (header::CONTENT_DISPOSITION, disposition),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                content,
            )
                .into_response()
        }
        Err(StoreError::NotFound(_)) => Envelope::fail(
            ErrorCode::FileNotFound,
            format!("File {} does not exist or has expired", file_id),
        )
        .into_response(),
        Err(e) => {
            warn!(target: targets::HTTP, file_id = %file_id, error = %e, "Temp file read failed");
            Envelope::fail(ErrorCode::InternalError, "Failed to read stored file").into_response()
        }
    }
}

/// Strip header-breaking characters from a client-facing filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect()
}

// ============================================================================
// Fallback
// ============================================================================

/// Unmatched routes get the uniform envelope instead of a bare 404.
async fn fallback_handler() -> Response {
    Envelope::fail(ErrorCode::NotFound, "Route not found").into_response()
}
