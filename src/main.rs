#![allow(dead_code)]
#![allow(unused_imports)]

mod auth;
mod cli;
mod config;
mod dispatch;
mod envelope;
mod functions;
mod logging;
mod registry;
mod server;
mod storage;
mod validation;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use cli::{Cli, Command, ConfigCommand};
use logging::targets;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand or explicit `start` both launch the server.
        None | Some(Command::Start) => run_server().await,

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show()?,
                ConfigCommand::Get { key } => cli::handle_config_get(&key)?,
                ConfigCommand::Set { key, value } => cli::handle_config_set(&key, &value)?,
                ConfigCommand::Path => cli::handle_config_path(),
            }
            Ok(())
        }

        Some(Command::Status { port, host }) => cli::handle_status(&host, port).await,

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

/// Run the gateway server.
async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    // Config drives the log format/output, so load it before logging comes
    // up and report any load problem right after.
    let (cfg, load_err) = match config::load_config() {
        Ok(c) => (c, None),
        Err(e) => (Value::Object(serde_json::Map::new()), Some(e)),
    };
    init_logging_from_config(&cfg)?;
    if let Some(e) = load_err {
        warn!(target: targets::GATEWAY, "Failed to load config: {}, using defaults", e);
    }
    for issue in config::validate_config(&cfg) {
        warn!(target: targets::GATEWAY, "Config warning at {}: {}", issue.path, issue.message);
    }

    let state_dir = config::resolve_state_dir();
    std::fs::create_dir_all(&state_dir)?;

    let resolved = resolve_bind_config(&cfg)?;
    let store = build_store(&cfg, &state_dir).await?;
    let registry = Arc::new(build_registry(&cfg));
    let http_config = server::http::build_http_config(&cfg);

    log_startup_banner(&resolved, &state_dir, &registry, &http_config);

    let server_config = server::startup::ServerConfig {
        http_config,
        middleware_config: build_middleware_config(&cfg),
        registry,
        store,
        bind_address: resolved.address,
        spawn_background_tasks: true,
    };

    let handle = server::startup::run_server_with_config(server_config).await?;

    let reason = await_shutdown_trigger().await;
    info!(target: targets::GATEWAY, "Shutdown signal received ({})", reason);
    handle.shutdown().await;
    info!(target: targets::GATEWAY, "Gateway shut down");
    Ok(())
}

/// Initialize logging from the SWITCHBOARD_DEV flag and the logging config
/// section.
fn init_logging_from_config(cfg: &Value) -> Result<(), Box<dyn std::error::Error>> {
    let log_config = if config::dev_mode() {
        logging::LogConfig::development()
    } else {
        logging::LogConfig::from_config_value(cfg)
    };
    logging::init_logging(log_config)?;
    Ok(())
}

/// Parse the bind address and port from the gateway configuration section.
fn resolve_bind_config(
    cfg: &Value,
) -> Result<server::bind::ResolvedBind, Box<dyn std::error::Error>> {
    let gateway = cfg.get("gateway").and_then(|v| v.as_object());
    let bind_str = gateway
        .and_then(|g| g.get("bind"))
        .and_then(|v| v.as_str())
        .unwrap_or("loopback");
    let port = server::bind::port_from_config(cfg);

    let bind_mode = server::bind::parse_bind_mode(bind_str);
    Ok(server::bind::resolve_bind_with_metadata(&bind_mode, port)?)
}

/// Build the temp store from the storage configuration section.
async fn build_store(
    cfg: &Value,
    state_dir: &Path,
) -> Result<Arc<storage::TempStore>, Box<dyn std::error::Error>> {
    let section = cfg.get("storage").and_then(|v| v.as_object());
    let get = |key: &str| section.and_then(|s| s.get(key)).and_then(|v| v.as_u64());

    let mut store_config = storage::StoreConfig::default().with_base_dir(state_dir.join("temp"));
    if let Some(secs) = get("ttlSecs") {
        store_config = store_config.with_ttl(Duration::from_secs(secs));
    }
    if let Some(secs) = get("sweepIntervalSecs") {
        store_config = store_config.with_sweep_interval(Duration::from_secs(secs));
    }
    if let Some(bytes) = get("maxFileBytes") {
        store_config = store_config.with_max_file_size(bytes);
    }
    if let Some(bytes) = get("maxTotalBytes") {
        store_config = store_config.with_max_total_size(bytes);
    }
    if let Some(secs) = get("orphanAgeSecs") {
        store_config = store_config.with_orphan_age(Duration::from_secs(secs));
    }

    Ok(Arc::new(storage::TempStore::new(store_config).await?))
}

/// Populate the function registry with the built-in function table.
fn build_registry(cfg: &Value) -> registry::Registry {
    let functions_config = functions::FunctionsConfig::from_config(cfg);
    functions::register_builtins(registry::Registry::builder(), &functions_config).build()
}

/// Build middleware configuration from the limits section.
fn build_middleware_config(cfg: &Value) -> server::http::MiddlewareConfig {
    let limits = cfg.get("limits").and_then(|v| v.as_object());
    let get = |key: &str| limits.and_then(|l| l.get(key)).and_then(|v| v.as_u64());

    let mut rate_builder = server::ratelimit::RateLimitConfig::builder();
    if let Some(n) = get("rateMaxRequests") {
        rate_builder = rate_builder.max_requests(n as u32);
    }
    if let Some(secs) = get("rateWindowSecs") {
        rate_builder = rate_builder.window(Duration::from_secs(secs));
    }
    if let Some(secs) = get("rateBlockSecs") {
        rate_builder = rate_builder.block_duration(Duration::from_secs(secs));
    }

    server::http::MiddlewareConfig {
        rate_limit: rate_builder.build(),
        enable_rate_limit: true,
    }
}

/// Log the startup banner with version, bind info, state dir, and registry size.
fn log_startup_banner(
    resolved: &server::bind::ResolvedBind,
    state_dir: &Path,
    registry: &registry::Registry,
    http_config: &server::http::HttpConfig,
) {
    info!(target: targets::GATEWAY, "Switchboard gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(target: targets::GATEWAY, "Listening on {}", resolved.description);
    info!(target: targets::GATEWAY, "State directory: {}", state_dir.display());
    info!(target: targets::GATEWAY, "Functions registered: {}", registry.len());
    if http_config.admin_token.is_some() {
        info!(target: targets::GATEWAY, "Admin endpoint: enabled");
    } else {
        info!(target: targets::GATEWAY, "Admin endpoint: disabled (no admin token configured)");
    }
    if resolved.externally_accessible {
        warn!(target: targets::GATEWAY, "Server is reachable from other hosts; set gateway.adminToken");
    }
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                target: targets::GATEWAY,
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            match tokio::signal::ctrl_c().await {
                Ok(()) => "ctrl-c",
                Err(e) => {
                    panic!("Failed to install Ctrl+C handler: {}", e);
                }
            }
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            panic!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}
