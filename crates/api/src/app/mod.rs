//! HTTP application wiring (Axum router over the generation service).
//!
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, middleware::from_fn, routing::get};
use tower::ServiceBuilder;

use scribe_infra::GenerationService;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(service: Arc<GenerationService>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(service))
        .layer(from_fn(middleware::request_log))
        .layer(ServiceBuilder::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::json;
    use tower::ServiceExt;

    use scribe_extraction::{EchoExtractor, LogNotificationSink};
    use scribe_memory::{InMemoryIndexStore, InMemoryRelationalStore};
    use scribe_infra::GenerationServiceConfig;

    fn test_app() -> Router {
        let service = Arc::new(GenerationService::start(
            GenerationServiceConfig {
                workers: 1,
                ..Default::default()
            },
            EchoExtractor,
            InMemoryRelationalStore::arc(),
            InMemoryIndexStore::arc(),
            LogNotificationSink,
        ));
        build_app(service)
    }

    #[tokio::test]
    async fn health_responds_ok() {
        let app = test_app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_accepts_well_formed_job() {
        let app = test_app();
        let body = json!({
            "kind": "generate_memory",
            "project_id": uuid::Uuid::now_v7(),
            "source_id": uuid::Uuid::now_v7(),
            "text": "the decision",
        });
        let response = app
            .oneshot(
                Request::post("/jobs")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn submit_rejects_malformed_body() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::post("/jobs")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"kind":"generate_memory"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
