//! The /metrics endpoint.
//!
//! Serving is intentionally thin: every request gathers whatever the
//! source caches currently hold and encodes it, so emission cadence is
//! fully decoupled from refresh cadence.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::collector::NetworkDependencyCollector;
use crate::{FleetmapError, Result};

/// Register the dependency collector on a fresh registry.
pub fn build_registry(collector: NetworkDependencyCollector) -> Result<Registry> {
    let registry = Registry::new();
    registry
        .register(Box::new(collector))
        .map_err(|e| FleetmapError::MetricsError(e.to_string()))?;

    Ok(registry)
}

pub fn build_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(|| async { "ok" }))
        .with_state(registry)
}

async fn metrics(State(registry): State<Registry>) -> Response {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();

    if let Err(e) = encoder.encode(&families, &mut buf) {
        error!("encoding metrics failed: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response()
}

/// Serve the metrics endpoint until the token is cancelled.
pub async fn serve(listen_address: &str, registry: Registry, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    info!("serving metrics on http://{}/metrics", listen_address);

    axum::serve(listener, build_router(registry))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}
