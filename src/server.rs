//! HTTP surface: the push endpoint and a health check.

use crate::ingest::Pipeline;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Everything a request handler needs.
pub struct AppState {
    pub pipeline: Pipeline,
    /// Answer rejected events with 200 so the delivery system drops them.
    pub ack_rejected_events: bool,
}

/// `POST /` takes events, `GET /healthz` reports liveness.
pub fn router(state: Arc<AppState>, request_timeout: Option<Duration>) -> Router {
    let mut router = Router::new()
        .route("/", post(handle_push))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    // A deadline is a transient failure: answer 5xx so the event is redelivered.
    if let Some(timeout) = request_timeout {
        router = router.layer(TimeoutLayer::with_status_code(
            StatusCode::SERVICE_UNAVAILABLE,
            timeout,
        ));
    }
    router
}

/// The body is taken as raw bytes so a malformed envelope becomes a
/// rejection with our own body, not axum's extractor error.
async fn handle_push(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let outcome = state.pipeline.process_body(&body).await;
    outcome.into_response(state.ack_rejected_events)
}

async fn healthz() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining requests");
}
