//! Ollama Transport Implementation
//!
//! HTTP client for Ollama (local LLM server), or for any relay that forwards
//! `/api/*` to one unchanged.
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with message history, streamed as NDJSON
//! - `/api/tags` - List available models (also used as the status probe)

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::retry::{connect_with_retry, AttemptError, RetryPolicy};
use super::traits::{cancellable, ByteStream, ChatRequest, ChatTransport, ModelDescriptor};
use crate::config::ChatConfig;
use crate::error::TransportError;

/// Default Ollama address
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Fixed timeout for the status probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-attempt deadline for establishing a chat connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for listing models
const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(10);

/// Ollama transport client
#[derive(Clone, Debug)]
pub struct OllamaTransport {
    /// Base URL without trailing slash, e.g. `http://localhost:11434`
    base_url: String,
    /// HTTP client
    http_client: reqwest::Client,
    /// Deadline for each connection attempt (until response headers)
    connect_timeout: Duration,
    /// Timeout for the status probe
    probe_timeout: Duration,
    /// Backoff schedule for connection failures
    retry: RetryPolicy,
}

impl OllamaTransport {
    /// Create a new transport for the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_settings(
            base_url,
            DEFAULT_CONNECT_TIMEOUT,
            PROBE_TIMEOUT,
            RetryPolicy::default(),
        )
    }

    /// Create a transport with explicit timeouts and retry policy
    pub fn with_settings(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        probe_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            connect_timeout,
            probe_timeout,
            retry,
        }
    }

    /// Create from loaded configuration
    #[must_use]
    pub fn from_config(config: &ChatConfig) -> Self {
        Self::with_settings(
            config.base_url.clone(),
            config.connect_timeout,
            config.probe_timeout,
            config.retry.clone(),
        )
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the retry policy
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

impl Default for OllamaTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Sort a failed attempt into retryable connection failures and the rest
fn classify_send_error(error: reqwest::Error) -> AttemptError {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        AttemptError::Retryable(error.to_string())
    } else {
        AttemptError::Fatal(TransportError::Connection {
            attempts: 1,
            message: error.to_string(),
        })
    }
}

/// Build a status error from a non-success response
async fn status_error(response: reqwest::Response) -> TransportError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    TransportError::Status {
        status: status.as_u16(),
        message: error_message_from_body(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    }
}

/// Extract `{"error": "..."}` from a response body
fn error_message_from_body(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("error")?
        .as_str()
        .map(String::from)
}

/// Parse the `/api/tags` payload
///
/// A missing `models` field is an empty list; entries without a name are
/// skipped.
pub(crate) fn parse_tags(data: &serde_json::Value) -> Vec<ModelDescriptor> {
    data.get("models")
        .and_then(|m| m.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|m| {
                    let name = m.get("name")?.as_str()?.to_string();
                    let size = m.get("size").and_then(serde_json::Value::as_u64);
                    let parameter_size = m
                        .get("details")
                        .and_then(|d| d.get("parameter_size"))
                        .and_then(|p| p.as_str())
                        .map(String::from);

                    Some(ModelDescriptor {
                        name,
                        size,
                        parameter_size,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ChatTransport for OllamaTransport {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn probe(&self) -> bool {
        match self
            .http_client
            .get(self.tags_url())
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, url = %self.tags_url(), "Backend unreachable");
                false
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await
            .map_err(|e| TransportError::Connection {
                attempts: 1,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;

        let models = parse_tags(&data);
        tracing::debug!(count = models.len(), "Listed models");
        Ok(models)
    }

    async fn post_chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        request.validate()?;

        let url = self.chat_url();
        let response = connect_with_retry(&self.retry, cancel, |attempt| {
            tracing::debug!(
                attempt = attempt + 1,
                model = %request.model,
                messages = request.messages.len(),
                url = %url,
                "Posting chat request"
            );
            let pending = self.http_client.post(&url).json(request).send();
            let deadline = self.connect_timeout;
            async move {
                match tokio::time::timeout(deadline, pending).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(e)) => Err(classify_send_error(e)),
                    Err(_) => Err(AttemptError::Retryable(format!(
                        "no response within {}ms",
                        deadline.as_millis()
                    ))),
                }
            }
        })
        .await?;

        // Headers are in: from here on nothing is retried
        if !response.status().is_success() {
            // The error body can stall as long as any other body
            return tokio::select! {
                biased;
                () = cancel.cancelled() => Err(TransportError::Cancelled),
                error = status_error(response) => Err(error),
            };
        }

        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::Stream(e.to_string()))
            })
            .boxed();

        Ok(cancellable(body, cancel.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        let transport = OllamaTransport::new("http://localhost:11434/");
        assert_eq!(transport.base_url(), "http://localhost:11434");
        assert_eq!(transport.chat_url(), "http://localhost:11434/api/chat");
        assert_eq!(transport.tags_url(), "http://localhost:11434/api/tags");
        assert_eq!(transport.retry_policy(), &RetryPolicy::default());
    }

    #[test]
    fn test_relay_base_url() {
        let transport = OllamaTransport::new("http://localhost:3001");
        assert_eq!(transport.chat_url(), "http://localhost:3001/api/chat");
    }

    #[test]
    fn test_parse_tags() {
        let data = serde_json::json!({
            "models": [
                {"name": "llama3.2:latest", "size": 2019393189u64, "details": {"parameter_size": "3.2B"}},
                {"name": "mistral"},
                {"size": 12}
            ]
        });
        let models = parse_tags(&data);
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3.2:latest");
        assert_eq!(models[0].size, Some(2_019_393_189));
        assert_eq!(models[0].parameter_size.as_deref(), Some("3.2B"));
        assert_eq!(models[1], ModelDescriptor::new("mistral"));
    }

    #[test]
    fn test_parse_tags_without_models_field() {
        assert!(parse_tags(&serde_json::json!({})).is_empty());
        assert!(parse_tags(&serde_json::json!({"models": null})).is_empty());
    }

    #[test]
    fn test_error_message_from_body() {
        assert_eq!(
            error_message_from_body(r#"{"error":"model 'x' not found"}"#),
            Some("model 'x' not found".to_string())
        );
        assert_eq!(error_message_from_body("Bad Gateway"), None);
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_call() {
        // Nothing listens on port 9; validation must fail first
        let transport = OllamaTransport::new("http://127.0.0.1:9");
        let request = ChatRequest::new("", vec![]);
        let result = transport
            .post_chat(&request, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::InvalidRequest(_))));
    }
}
