use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET / - welcome message pointing at the API root.
pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "Welcome to the Hourglass job scheduler API",
        "api": hourglass_core::config::API_PREFIX,
    }))
}

/// GET /health - liveness check, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let jobs = state.jobs.store().count().ok();
    Json(json!({
        "status": if jobs.is_some() { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "timezone": state.config.scheduler.timezone,
        "jobs": jobs,
    }))
}
