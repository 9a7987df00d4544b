use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use scribe_core::{ProjectId, SourceId};

/// Accumulated conversation state handed to the extraction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationInput {
    /// Project the conversation belongs to.
    pub project_id: ProjectId,
    /// The conversational source being distilled (message, comment, summary).
    pub source_id: SourceId,
    /// Raw accumulated text.
    pub text: String,
    /// Free-form metadata (intent, clarity score, channel, etc).
    pub metadata: JsonValue,
}

impl ConversationInput {
    pub fn new(project_id: ProjectId, source_id: SourceId, text: impl Into<String>) -> Self {
        Self {
            project_id,
            source_id,
            text: text.into(),
            metadata: JsonValue::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Structured output of the extraction service.
///
/// The concrete field schema is owned by the extraction service; the pipeline
/// treats it as opaque content plus attributes to persist and index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredFields {
    /// Text content to persist and embed.
    pub content: String,
    /// Structured attributes extracted from the conversation.
    pub attributes: JsonValue,
}

impl StructuredFields {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attributes: JsonValue::Null,
        }
    }

    pub fn with_attributes(mut self, attributes: JsonValue) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Extraction failure, classified at the boundary.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The input cannot ever be extracted (malformed, empty, wrong shape).
    /// Not retryable.
    #[error("malformed extraction input: {0}")]
    Malformed(String),

    /// The extraction service is temporarily unreachable or timed out.
    /// Retryable under backoff.
    #[error("extraction service unavailable: {0}")]
    Unavailable(String),
}

/// The extraction-service seam.
///
/// Implementations must not mutate pipeline state; they turn conversation
/// text into structured fields, nothing more.
pub trait Extractor: Send + Sync + 'static {
    fn extract(&self, input: &ConversationInput) -> Result<StructuredFields, ExtractError>;
}

/// Pass-through extractor for dev and tests: the conversation text *is* the
/// content, metadata is carried over as attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoExtractor;

impl Extractor for EchoExtractor {
    fn extract(&self, input: &ConversationInput) -> Result<StructuredFields, ExtractError> {
        if input.text.trim().is_empty() {
            return Err(ExtractError::Malformed("empty conversation text".to_string()));
        }

        Ok(StructuredFields {
            content: input.text.clone(),
            attributes: input.metadata.clone(),
        })
    }
}

impl<E> Extractor for std::sync::Arc<E>
where
    E: Extractor + ?Sized,
{
    fn extract(&self, input: &ConversationInput) -> Result<StructuredFields, ExtractError> {
        (**self).extract(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(text: &str) -> ConversationInput {
        ConversationInput::new(ProjectId::new(), SourceId::new(), text)
    }

    #[test]
    fn echo_passes_text_through() {
        let fields = EchoExtractor.extract(&input("the export must be idempotent")).unwrap();
        assert_eq!(fields.content, "the export must be idempotent");
    }

    #[test]
    fn echo_rejects_empty_text() {
        let err = EchoExtractor.extract(&input("   ")).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }
}
