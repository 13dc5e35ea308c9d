//! Health check endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::RelayState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub mode: &'static str,
}

/// Liveness probe with the relay mode
async fn health(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        mode: state.mode.name(),
    })
}

/// Build health router
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}
