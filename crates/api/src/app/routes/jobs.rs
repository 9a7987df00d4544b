//! Job submission, status and cancellation.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use scribe_core::JobId;
use scribe_infra::GenerationService;

use crate::app::dto::{CancelResponse, StatsResponse, SubmitJobRequest, SubmitJobResponse};
use crate::app::errors::{json_error, queue_error_to_response, submit_error_to_response};

pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(job_status))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/stats", get(stats))
}

/// POST /jobs
///
/// Validates and enqueues a job; returns `202 Accepted` with the job id.
/// Execution happens on the worker pool.
async fn submit_job(
    Extension(service): Extension<Arc<GenerationService>>,
    Json(request): Json<SubmitJobRequest>,
) -> axum::response::Response {
    let priority = request.priority;
    match service.submit(request.into_payload(), priority) {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })).into_response(),
        Err(err) => submit_error_to_response(err),
    }
}

/// GET /jobs/{id}
async fn job_status(
    Extension(service): Extension<Arc<GenerationService>>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    match service.status(JobId::from_uuid(id)) {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        Err(err) => queue_error_to_response(err),
    }
}

/// POST /jobs/{id}/cancel
///
/// Cooperative: the flag takes effect at the owning worker's next stage
/// boundary. `cancelled: false` means the job is unknown or already
/// terminal.
async fn cancel_job(
    Extension(service): Extension<Arc<GenerationService>>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    match service.cancel(JobId::from_uuid(id)) {
        Ok(cancelled) => Json(CancelResponse { cancelled }).into_response(),
        Err(err) => queue_error_to_response(err),
    }
}

/// GET /stats
async fn stats(
    Extension(service): Extension<Arc<GenerationService>>,
) -> axum::response::Response {
    match service.queue_stats() {
        Ok(queue) => Json(StatsResponse {
            queue,
            pool: service.pool_stats(),
        })
        .into_response(),
        Err(err) => queue_error_to_response(err),
    }
}
