//! HTTP client for the external embedding index.
//!
//! The index service exposes a small entry API keyed by the shared memory
//! key: `PUT /entries/{key}` upserts, `DELETE /entries/{key}` removes.
//! Transport failures and 5xx responses classify as `Unavailable`
//! (retryable); 4xx responses classify as `Rejected` (not retryable).

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use scribe_memory::{IndexError, IndexStore, MemoryKey};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Index store over an HTTP entry API.
#[derive(Debug, Clone)]
pub struct HttpIndexStore {
    client: Client,
    base_url: String,
}

impl HttpIndexStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, IndexError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// The timeout bounds each index call; a timed-out call surfaces as
    /// `Unavailable` and is retried by the pipeline's normal backoff.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn entry_url(&self, key: &MemoryKey) -> String {
        format!("{}/entries/{}", self.base_url, key)
    }
}

impl IndexStore for HttpIndexStore {
    fn store(&self, key: &MemoryKey, content: &str, metadata: &JsonValue) -> Result<(), IndexError> {
        let response = self
            .client
            .put(self.entry_url(key))
            .json(&json!({ "content": content, "metadata": metadata }))
            .send()
            .map_err(transport_error)?;

        classify_status(response.status())?;
        debug!(key = %key, "index entry stored");
        Ok(())
    }

    fn delete(&self, key: &MemoryKey) -> Result<(), IndexError> {
        let response = self
            .client
            .delete(self.entry_url(key))
            .send()
            .map_err(transport_error)?;

        // A missing entry is already the desired end state.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        classify_status(response.status())?;
        debug!(key = %key, "index entry deleted");
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> IndexError {
    IndexError::Unavailable(format!("index transport: {err}"))
}

fn classify_status(status: StatusCode) -> Result<(), IndexError> {
    if status.is_success() {
        Ok(())
    } else if status.is_client_error() {
        Err(IndexError::Rejected(format!("index returned {status}")))
    } else {
        Err(IndexError::Unavailable(format!("index returned {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::OK).is_ok());
        assert!(classify_status(StatusCode::CREATED).is_ok());
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            Err(IndexError::Rejected(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Err(IndexError::Unavailable(_))
        ));
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let store = HttpIndexStore::new("http://localhost:9500/").unwrap();
        let key = MemoryKey::new();
        assert_eq!(
            store.entry_url(&key),
            format!("http://localhost:9500/entries/{key}")
        );
    }
}
