//! HTTP exporter for the reseed metrics.
//!
//! `/metrics` serves the Prometheus text format. `/health` answers 503 until
//! the generator has applied its first pulse, so an orchestrator does not
//! route traffic to a process still drawing from its fallback generator.

use super::{MetricsRegistry, MetricsSnapshot, DEFAULT_METRICS_PORT};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics state shared between the exporter and the code that updates it.
pub type SharedMetrics = Arc<RwLock<MetricsState>>;

/// Errors from the metrics exporter.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind metrics listener: {0}")]
    Bind(#[from] std::io::Error),

    /// The server stopped with an error after binding.
    #[error("metrics server failed: {0}")]
    Serve(String),
}

/// Where the exporter listens.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    /// Loopback on [`DEFAULT_METRICS_PORT`].
    fn default() -> Self {
        Self::with_port(DEFAULT_METRICS_PORT)
    }
}

impl MetricsServerConfig {
    /// Loopback on `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: (Ipv4Addr::LOCALHOST, port).into(),
        }
    }

    /// All interfaces on `port`, for scraping from another host.
    pub fn public(port: u16) -> Self {
        Self {
            bind_addr: (Ipv4Addr::UNSPECIFIED, port).into(),
        }
    }
}

/// Registry plus the readiness bit behind `/health`.
pub struct MetricsState {
    registry: MetricsRegistry,
    ready: bool,
}

impl MetricsState {
    /// Applies a snapshot to the registry and the readiness bit.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.ready = snapshot.ready;
    }

    /// Whether the last snapshot reported an applied pulse.
    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Prometheus exporter for one reseeding generator.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: SharedMetrics,
}

impl MetricsServer {
    /// Creates an exporter that reports not-ready until the first update.
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MetricsState {
                registry,
                ready: false,
            })),
        }
    }

    /// Handle for pushing snapshots into the exporter.
    pub fn state(&self) -> SharedMetrics {
        Arc::clone(&self.state)
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state))
    }

    /// Binds and serves until the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Metrics exporter listening");

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))
    }
}

async fn metrics_handler(State(state): State<SharedMetrics>) -> impl IntoResponse {
    match state.read().await.registry.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            body,
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

async fn health_handler(State(state): State<SharedMetrics>) -> impl IntoResponse {
    if state.read().await.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for first pulse")
    }
}
