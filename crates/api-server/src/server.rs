//! API server assembly: router, middleware stack, and the Prometheus
//! exporter on its own port.

use crate::headers;
use crate::rest::{self, AppState};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use guard_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            // Flag administration
            .route("/v1/flags", get(rest::list_flags))
            .route("/v1/flags/:id/rollout", post(rest::update_rollout))
            .route("/v1/flags/:id/gradual", post(rest::start_gradual))
            .route("/v1/flags/:id/toggle", post(rest::toggle_flag))
            .route("/v1/flags/:id/evaluate", get(rest::evaluate_flag))
            // Control loop feeds
            .route("/v1/samples", post(rest::ingest_sample))
            .route("/v1/rollback", post(rest::manual_rollback))
            .route("/v1/dashboard", get(rest::dashboard))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(middleware::from_fn_with_state(
                state.clone(),
                headers::feature_headers,
            ))
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP server. Blocks until shutdown.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = Self::router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the metrics exporter on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.api.metrics_port,
            ))
            .install_recorder()?;

        info!(port = self.config.api.metrics_port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
