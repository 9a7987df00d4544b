//! `scribe-api` — the HTTP surface of the generation backend.

pub mod app;
pub mod middleware;
