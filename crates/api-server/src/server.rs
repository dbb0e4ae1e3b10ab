//! API server: the SDK REST surface plus the Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thunder_core::config::AppConfig;
use thunder_decision::SdkService;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Routes and middleware, without binding a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        // SDK endpoints
        .route("/cta/v1/active/state-machines", post(rest::active_state_machines))
        .route("/cta/active/state-machines", post(rest::active_state_machines))
        .route("/cta/state-machines/snapshot/delta", post(rest::snapshot_delta))
        // Operational endpoints
        .route("/healthcheck", get(rest::health_check))
        .route("/healthcheck/ping", get(rest::ping))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    service: Arc<SdkService>,
}

impl ApiServer {
    pub fn new(config: AppConfig, service: Arc<SdkService>) -> Self {
        Self { config, service }
    }

    pub fn router(&self) -> Router {
        router(AppState {
            service: self.service.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        })
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();

        let addr = SocketAddr::new(
            self.config.api.host.parse()?,
            self.config.api.http_port,
        );

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
