//! HTTP surface: webhook + health routes, and the metrics listener.
//!
//! Two routers are exposed: the main router carries the webhook endpoint
//! and the liveness/readiness probes; the metrics router lives on its own
//! listen address so scrape traffic never competes with webhook delivery.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use prometheus::Registry;
use tracing::error;

use crate::checker::Queue;
use crate::metrics;
use crate::webhook;

/// Shared state for the main router.
#[derive(Clone)]
pub struct AppState {
    pub webhook: Arc<webhook::Handler>,
    pub queue: Arc<Queue>,
}

/// Builds the main router: webhook fan-in plus liveness and readiness.
pub fn main_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/github", post(webhook::handle))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Builds the metrics router for the separate metrics listen address.
pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(registry)
}

/// Normalizes a Go-style `:8080` listen address to a bindable socket
/// address.
#[must_use]
pub fn normalize_listen_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        return format!("0.0.0.0:{port}");
    }

    addr.to_string()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Response {
    if state.queue.accepting() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn serve_metrics(State(registry): State<Registry>) -> Response {
    match metrics::encode_text(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_port_addresses() {
        assert_eq!(normalize_listen_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_listen_addr(":9090"), "0.0.0.0:9090");
    }

    #[test]
    fn leaves_full_addresses_untouched() {
        assert_eq!(normalize_listen_addr("127.0.0.1:8080"), "127.0.0.1:8080");
        assert_eq!(normalize_listen_addr("0.0.0.0:80"), "0.0.0.0:80");
    }
}
