//! HTTP client for the extraction service.
//!
//! `POST /extract` with the accumulated conversation; the service answers
//! with the structured fields to persist. Transport failures and 5xx map to
//! `Unavailable` (retryable), 4xx to `Malformed` (the input will never
//! extract, terminal).

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use scribe_extraction::{ConversationInput, ExtractError, Extractor, StructuredFields};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Extraction backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    content: String,
    #[serde(default)]
    attributes: JsonValue,
}

impl HttpExtractor {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ExtractError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/extract", base_url.into().trim_end_matches('/')),
        })
    }
}

impl Extractor for HttpExtractor {
    fn extract(&self, input: &ConversationInput) -> Result<StructuredFields, ExtractError> {
        let response = self
            .client
            .post(&self.url)
            .json(input)
            .send()
            .map_err(|e| ExtractError::Unavailable(format!("extraction transport: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ExtractError::Malformed(format!(
                "extraction service returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(ExtractError::Unavailable(format!(
                "extraction service returned {status}"
            )));
        }

        let body: ExtractResponse = response
            .json()
            .map_err(|e| ExtractError::Unavailable(format!("extraction response: {e}")))?;
        debug!(source_id = %input.source_id, content_len = body.content.len(), "extraction completed");

        Ok(StructuredFields {
            content: body.content,
            attributes: body.attributes,
        })
    }
}
