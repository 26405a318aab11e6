//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the agent RPC, query and operator routes
//! - Wire up middleware (tracing, request timeout)
//! - Serve until the shutdown signal fires

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::{AdminConfig, MonitorConfig};
use crate::http::handlers;
use crate::monitor::Monitor;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub admin: Arc<AdminConfig>,
}

/// HTTP front of the monitor.
pub struct MonitorServer {
    router: Router,
}

impl MonitorServer {
    pub fn new(monitor: Arc<Monitor>, config: &MonitorConfig) -> Self {
        let state = AppState {
            monitor,
            admin: Arc::new(config.admin.clone()),
        };
        let router = Self::build_router(config, state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &MonitorConfig, state: AppState) -> Router {
        let api = Router::new()
            .route("/healthz", get(handlers::healthz))
            .route("/api/v1/nodes", post(handlers::register_node))
            .route("/api/v1/nodes/{id}/active", post(handlers::node_active))
            .route("/api/v1/formations/{formation}/groups/{group}/nodes", get(handlers::get_nodes))
            .route("/api/v1/formations/{formation}/groups/{group}/primary", get(handlers::get_primary))
            .route(
                "/api/v1/formations/{formation}/groups/{group}/synchronous_standby_names",
                get(handlers::synchronous_standby_names),
            )
            .route("/api/v1/formations/{formation}/groups/{group}/state", get(handlers::group_state))
            .route("/api/v1/events", get(handlers::events))
            .with_state(state.clone());

        let app = if config.admin.enabled {
            api.merge(setup_admin_router(state))
        } else {
            api
        };

        app.layer(TimeoutLayer::new(Duration::from_millis(config.timeouts.request_ms)))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
