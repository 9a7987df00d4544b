//! `scribe-extraction`
//!
//! **Responsibility:** boundary to the language-understanding collaborators.
//!
//! This crate is intentionally **not** part of the pipeline core:
//! - It defines the `Extractor` seam the worker calls during the extract stage.
//! - It does not decide retry policy; it only classifies its own failures.
//! - The actual model call lives behind the trait (HTTP client, local model,
//!   or the `EchoExtractor` pass-through used in dev and tests).

pub mod extractor;
pub mod notify;

pub use extractor::{ConversationInput, EchoExtractor, ExtractError, Extractor, StructuredFields};
pub use notify::{InMemoryNotificationSink, LogNotificationSink, NotificationSink};
