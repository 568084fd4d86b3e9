//! HTTP surface of the exporter.
//!
//! Three endpoints: `/metrics` renders one collection pass in the text
//! exposition format, `/healthz` reports process liveness, `/readyz`
//! re-checks the cgroup root. Collection does synchronous filesystem I/O,
//! so the metrics handler runs it on the blocking pool instead of the
//! async executor.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Registry, TextEncoder};
use tokio::net::ToSocketAddrs;

use crate::config::Config;
use crate::readiness;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
struct AppState {
    registry: Registry,
    config: Arc<Config>,
}

async fn metrics(State(state): State<AppState>) -> Response {
    let registry = state.registry.clone();
    let encoded = tokio::task::spawn_blocking(move || {
        let families = registry.gather();
        TextEncoder::new().encode_to_string(&families)
    })
    .await;

    match encoded {
        Ok(Ok(body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Ok(Err(err)) => {
            log::error!("failed to encode metrics: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode metrics",
            )
                .into_response()
        }
        Err(err) => {
            log::error!("metrics collection task failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "collection failed").into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Response {
    match readiness::check_cgroup_root(&state.config.cgroup_root) {
        Ok(()) => (StatusCode::OK, "ready").into_response(),
        Err(err) => {
            log::warn!("readiness check failed: {err}");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
    }
}

/// The exporter's HTTP server.
pub struct MetricsServer {
    router: axum::Router,
}

impl MetricsServer {
    pub fn new(registry: Registry, config: Arc<Config>) -> Self {
        let state = AppState { registry, config };
        let router = axum::Router::new()
            .route("/metrics", get(metrics))
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .with_state(state);
        Self { router }
    }

    /// Binds the listener and serves until the task is cancelled or the
    /// listener fails.
    ///
    /// # Errors
    ///
    /// Returns the bind or accept error from the underlying listener.
    pub async fn listen(self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router.into_make_service()).await
    }
}
