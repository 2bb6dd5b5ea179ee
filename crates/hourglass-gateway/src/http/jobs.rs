//! Job CRUD endpoints under `/api/v1/jobs`.
//!
//! Errors are returned as `{"detail": "...", "code": "..."}` with a status
//! derived from the [`SchedulerError`] variant.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use hourglass_scheduler::{
    service::DEFAULT_LIMIT, CreateJobRequest, Job, SchedulerError, UpdateJobRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::app::AppState;

const MAX_LIMIT: u32 = 1_000;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
    pub code: &'static str,
}

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn status_for(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SchedulerError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        SchedulerError::NotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::ImmutableField { .. } => StatusCode::CONFLICT,
        SchedulerError::Database(_) | SchedulerError::LockPoisoned => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: SchedulerError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(code = err.code(), "job request failed: {err}");
    }
    (
        status,
        Json(ErrorBody {
            detail: err.to_string(),
            code: err.code(),
        }),
    )
}

fn bad_input(detail: String) -> ApiError {
    api_error(SchedulerError::Validation(detail))
}

/// GET /api/v1/jobs?skip=0&limit=100
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Job>>> {
    let Query(query) = query.map_err(|e| bad_input(e.body_text()))?;
    let jobs = state
        .jobs
        .list(query.skip, query.limit.min(MAX_LIMIT))
        .map_err(api_error)?;
    Ok(Json(jobs))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Job>> {
    let Path(id) = id.map_err(|e| bad_input(e.body_text()))?;
    state.jobs.get(id).map(Json).map_err(api_error)
}

/// POST /api/v1/jobs - returns 201 with the stored job.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let Json(req) = body.map_err(|e| bad_input(e.body_text()))?;
    let job = state.jobs.create(req).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// PUT|PATCH /api/v1/jobs/{id} - partial update.
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateJobRequest>, JsonRejection>,
) -> ApiResult<Json<Job>> {
    let Path(id) = id.map_err(|e| bad_input(e.body_text()))?;
    let Json(req) = body.map_err(|e| bad_input(e.body_text()))?;
    state.jobs.update(id, req).map(Json).map_err(api_error)
}

/// DELETE /api/v1/jobs/{id} - 204 on success.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id.map_err(|e| bad_input(e.body_text()))?;
    state.jobs.delete(id).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}
