//! Health and metrics endpoints
//!
//! `/healthz` reports liveness and uptime on the health port (8081 by default).
//! `/readyz` reports ready once the debouncer drain loop is running.
//! `/metrics` serves the Prometheus text format.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::debouncer::{Debouncer, DebouncerState};
use crate::error::Error;
use crate::manager::Runnable;
use crate::metrics;
use crate::scan_api::ScanApiStore;

// ============================================================================
// Health Status Types
// ============================================================================

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// `/healthz` response
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub uptime_secs: u64,
}

/// `/readyz` response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub debouncer: String,
    pub pending_keys: usize,
    pub scan_targets: usize,
}

// ============================================================================
// Router
// ============================================================================

/// Shared state for the health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub debouncer: Arc<Debouncer>,
    pub store: Arc<ScanApiStore>,
    pub start_time: Instant,
}

impl HealthState {
    pub fn new(debouncer: Arc<Debouncer>, store: Arc<ScanApiStore>) -> Self {
        Self {
            debouncer,
            store,
            start_time: Instant::now(),
        }
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

async fn liveness(State(state): State<HealthState>) -> impl IntoResponse {
    Json(LivenessResponse {
        status: HealthStatus::Healthy,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    let debouncer_state = state.debouncer.state();
    let status = if debouncer_state == DebouncerState::Running {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    let body = ReadinessResponse {
        status,
        debouncer: debouncer_state.to_string(),
        pending_keys: state.debouncer.pending_len(),
        scan_targets: state.store.len().await,
    };

    (status.status_code(), Json(body))
}

async fn prometheus_metrics() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Serves the health router until shutdown
pub struct HealthServer {
    bind_address: SocketAddr,
    state: HealthState,
}

impl HealthServer {
    pub fn new(bind_address: SocketAddr, state: HealthState) -> Self {
        Self {
            bind_address,
            state,
        }
    }
}

#[async_trait]
impl Runnable for HealthServer {
    fn name(&self) -> String {
        "health-server".to_string()
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> crate::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_address)
            .await
            .map_err(|e| Error::with_source(format!("Failed to bind {}", self.bind_address), e))?;

        tracing::info!(address = %self.bind_address, "Health server listening");

        let app = router(self.state.clone()).layer(TraceLayer::new_for_http());
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        Ok(())
    }
}
