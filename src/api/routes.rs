//! API route definitions.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::Sse;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::sse;
use super::state::AppState;
use crate::config::PublicConfig;
use crate::deploy::{DeployError, RunState};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/deploy", post(start_deploy))
        .route("/status", get(status))
        .route("/logs", get(stream_logs))
        .route("/config", get(config))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn start_deploy(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.deployer.start() {
        // Detached: the run outlives this request.
        Ok(_handle) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "deployment started" })),
        ),
        Err(e @ DeployError::AlreadyRunning) => {
            tracing::warn!("deploy request rejected: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": e.to_string() })),
            )
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<RunState> {
    Json(state.deployer.status())
}

async fn config(State(state): State<AppState>) -> Json<PublicConfig> {
    Json(state.public_config.as_ref().clone())
}

/// `Sse` sets `text/event-stream` and `no-cache`; proxies are told not to buffer.
async fn stream_logs(State(state): State<AppState>) -> impl IntoResponse {
    let events = sse::log_events(state.deployer.context().clone(), state.log_poll_interval);
    (
        [(header::HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(events),
    )
}
