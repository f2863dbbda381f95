//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] to allow integration tests
//! to spin up a real switchboard server on an ephemeral port, exercise its
//! HTTP endpoints, and shut it down cleanly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::logging::targets;
use crate::registry::Registry;
use crate::server::http::{HttpConfig, MiddlewareConfig};
use crate::storage::TempStore;

/// Everything needed to start a switchboard server.
pub struct ServerConfig {
    pub http_config: HttpConfig,
    pub middleware_config: MiddlewareConfig,
    pub registry: Arc<Registry>,
    pub store: Arc<TempStore>,
    pub bind_address: SocketAddr,
    /// When `false` (e.g. in tests), background tasks like the storage sweep
    /// are **not** spawned.
    pub spawn_background_tasks: bool,
}

impl ServerConfig {
    /// Minimal config suitable for integration tests.
    ///
    /// Binds to `127.0.0.1:0` (OS-assigned port), disables all middleware and
    /// background tasks.
    pub fn for_testing(registry: Arc<Registry>, store: Arc<TempStore>) -> Self {
        ServerConfig {
            http_config: HttpConfig::default(),
            middleware_config: MiddlewareConfig::none(),
            registry,
            store,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            spawn_background_tasks: false,
        }
    }
}

/// Handle to a running server.  Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The full local address (ip + port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://ip:port` base URL for the running server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Trigger graceful shutdown: notify background tasks, then await the
    /// server task.
    pub async fn shutdown(self) {
        // Signal background tasks to stop
        let _ = self.shutdown_tx.send(true);

        // Brief grace period for in-flight requests
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Wait for the server task to finish (with a timeout to avoid hanging)
        match tokio::time::timeout(Duration::from_secs(5), self.server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(target: targets::GATEWAY, "Server task returned error: {}", e),
            Ok(Err(e)) => error!(target: targets::GATEWAY, "Server task panicked: {}", e),
            Err(_) => warn!(target: targets::GATEWAY, "Server task did not finish within 5s timeout"),
        }
    }
}

/// Spawn background tasks (currently only the storage sweep).  Shared between
/// `run_server_with_config` and `main.rs`.
pub fn spawn_background_tasks(store: &Arc<TempStore>, shutdown_rx: &watch::Receiver<bool>) {
    let _ = store.clone().start_sweep_task(shutdown_rx.clone());
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// Returns a [`ServerHandle`] that exposes the actual bound address and
/// provides a [`ServerHandle::shutdown`] method for clean teardown.
pub async fn run_server_with_config(
    config: ServerConfig,
) -> Result<ServerHandle, Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Arc::new(Dispatcher::new(config.registry, config.store.clone()));
    let app = crate::server::http::create_router_with_state(
        config.http_config,
        config.middleware_config,
        dispatcher,
    );

    // Optionally spawn background tasks
    if config.spawn_background_tasks {
        spawn_background_tasks(&config.store, &shutdown_rx);
    }

    // Bind TCP listener (supports port 0 for ephemeral port assignment)
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(target: targets::GATEWAY, address = %local_addr, "HTTP server listening");

    // Spawn axum::serve as a background tokio task with graceful shutdown.
    // ConnectInfo is required so the rate limiter sees real client addresses.
    let mut shutdown_watch = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            // Wait until the shutdown channel is set to true
            loop {
                if *shutdown_watch.borrow() {
                    break;
                }
                if shutdown_watch.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        server_task,
    })
}
