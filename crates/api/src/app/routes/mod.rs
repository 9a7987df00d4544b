//! HTTP routes, one file per area.

use axum::Router;

pub mod jobs;
pub mod stream;
pub mod system;

pub fn router() -> Router {
    Router::new().merge(jobs::router()).merge(stream::router())
}
