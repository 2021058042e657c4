//! API server — assembles the router and starts the HTTP listener.

use crate::rest::{self, AppState};
use crate::{campaigns, communications, customers, segments};
use axum::routing::{get, post};
use axum::Router;
use pulse_core::config::AppConfig;
use std::net::SocketAddr;
use tracing::info;

use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Main API server for the REST surface.
pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            // Customers
            .route("/customers", post(customers::create).get(customers::list))
            .route("/customers/bulk", post(customers::bulk_create))
            .route("/customers/:id", get(customers::get))
            // Segments
            .route("/segments", post(segments::create).get(segments::list))
            .route("/segments/preview", post(segments::preview))
            .route(
                "/segments/:id",
                get(segments::get).put(segments::update),
            )
            // Campaigns
            .route("/campaigns", post(campaigns::create).get(campaigns::list))
            .route("/campaigns/:id", get(campaigns::get))
            // Delivery logs
            .route("/communications/receipt", post(communications::receipt))
            .route(
                "/communications/stats/:campaign_id",
                get(communications::stats),
            )
            .route(
                "/communications/campaign/:campaign_id",
                get(communications::list_for_campaign),
            )
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the HTTP server; blocks until shutdown.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Start the Prometheus metrics exporter on its own port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
