//! API server: segment and customer REST endpoints plus operational probes.

use crate::rest::{self, AppState};
use audience_core::config::AppConfig;
use audience_management::{management_router, ManagementState};
use audience_segmentation::{CustomerStore, SegmentStore};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Main API server over a customer store and a segment store.
pub struct ApiServer {
    config: AppConfig,
    customers: Arc<dyn CustomerStore>,
    segments: Arc<dyn SegmentStore>,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        customers: Arc<dyn CustomerStore>,
        segments: Arc<dyn SegmentStore>,
    ) -> Self {
        Self {
            config,
            customers,
            segments,
        }
    }

    /// Assemble the full application router.
    pub fn router(&self) -> Router {
        let state = AppState {
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
            segments: self.segments.clone(),
        };
        let management = ManagementState::new(self.customers.clone(), self.segments.clone());

        Router::new()
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            .with_state(state)
            // Segments and customers
            .merge(management_router(management))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the Prometheus exporter on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }

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
