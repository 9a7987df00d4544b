//! `scribe-infra` — concrete backends and service assembly.
//!
//! - [`postgres`]: the durable relational store over sqlx/Postgres,
//! - [`index_http`]: the HTTP client for the external embedding index,
//! - [`extract_http`]: the HTTP client for the extraction service,
//! - [`service`]: the wired-up generation service the HTTP surface uses.
//!
//! Everything here implements seams defined by the domain crates; nothing
//! in the pipeline depends back on this crate.

pub mod extract_http;
pub mod index_http;
pub mod postgres;
pub mod service;

pub use extract_http::HttpExtractor;
pub use index_http::HttpIndexStore;
pub use postgres::{PostgresMemoryStore, PostgresMemoryTransaction};
pub use service::{GenerationService, GenerationServiceConfig, SubmitError};
