use std::sync::Arc;

use axum::{routing::get, Router};
use hourglass_core::config::{HourglassConfig, API_PREFIX};
use hourglass_scheduler::JobService;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared state handed to every Axum handler as `Arc<AppState>`.
pub struct AppState {
    pub config: HourglassConfig,
    pub jobs: JobService,
}

impl AppState {
    pub fn new(config: HourglassConfig, jobs: JobService) -> Self {
        Self { config, jobs }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{health, jobs};

    let api = Router::new()
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/jobs/{id}",
            get(jobs::get_job)
                .put(jobs::update_job)
                .patch(jobs::update_job)
                .delete(jobs::delete_job),
        );

    Router::new()
        .route("/", get(health::root_handler))
        .route("/health", get(health::health_handler))
        .nest(API_PREFIX, api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
