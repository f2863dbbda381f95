//! Server module
//!
//! HTTP server, rate limiting, health checks, and startup plumbing.

pub mod bind;
pub mod health;
pub mod http;
pub mod ratelimit;
pub mod startup;

// Re-export key types
pub use http::{build_http_config, create_router_with_state, AppState, HttpConfig, MiddlewareConfig};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
