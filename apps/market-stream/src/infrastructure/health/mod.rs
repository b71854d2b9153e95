//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting the stream client's connection and subscription
//! status, plus Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (ready while the feed is connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::FeedTransport;
use crate::application::services::StreamFacade;
use crate::application::services::router::DiagnosticsSnapshot;
use crate::domain::connection::ConnectionState;
use crate::domain::subscription::SubscriptionState;
use crate::domain::symbol::Symbol;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Status Source
// =============================================================================

/// Read-only view of the stream for status reporting.
pub trait StreamStatus: Send + Sync {
    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;
    /// Watched symbols with subscription state.
    fn watched_symbols(&self) -> Vec<(Symbol, SubscriptionState)>;
    /// Frame counters.
    fn diagnostics(&self) -> DiagnosticsSnapshot;
}

impl<T: FeedTransport> StreamStatus for StreamFacade<T> {
    fn connection_state(&self) -> ConnectionState {
        Self::connection_state(self)
    }

    fn watched_symbols(&self) -> Vec<(Symbol, SubscriptionState)> {
        Self::watched_symbols(self)
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        Self::diagnostics(self)
    }
}

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection state.
    pub connection: ConnectionState,
    /// Subscription counts.
    pub subscriptions: SubscriptionStatus,
    /// Frame counters.
    pub frames: DiagnosticsSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected to the feed.
    Healthy,
    /// Connecting or reconnecting.
    Degraded,
    /// Stopped or failed.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting | ConnectionState::Reconnecting => Self::Degraded,
            ConnectionState::Disconnected | ConnectionState::Failed => Self::Unhealthy,
        }
    }
}

/// Subscription counts.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Watched symbols, sorted.
    pub symbols: Vec<Symbol>,
    /// Symbols subscribed on the current connection.
    pub active: usize,
    /// Symbols waiting for the next connection.
    pub pending: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    stream: Arc<dyn StreamStatus>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, stream: Arc<dyn StreamStatus>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            stream,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Routes served by the health server.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.stream.connection_state().is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.stream.connection_state();
    let watched = state.stream.watched_symbols();
    let active = watched
        .iter()
        .filter(|(_, s)| *s == SubscriptionState::Active)
        .count();

    HealthResponse {
        status: HealthStatus::from(connection),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection,
        subscriptions: SubscriptionStatus {
            active,
            pending: watched.len() - active,
            symbols: watched.into_iter().map(|(symbol, _)| symbol).collect(),
        },
        frames: state.stream.diagnostics(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
