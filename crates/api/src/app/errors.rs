use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use scribe_infra::SubmitError;
use scribe_pipeline::QueueError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Invalid(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        SubmitError::Queue(QueueError::AlreadyExists(id)) => {
            json_error(StatusCode::CONFLICT, "conflict", format!("job {id} already exists"))
        }
        SubmitError::Queue(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", e.to_string())
        }
    }
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        QueueError::AlreadyExists(id) => {
            json_error(StatusCode::CONFLICT, "conflict", format!("job {id} already exists"))
        }
        QueueError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", msg)
        }
    }
}
