//! Chat Transport Traits
//!
//! Wire types for the chat API and the trait the generation session talks
//! to. Keeping the transport behind a trait lets the session run against the
//! real HTTP client, a relay, or an in-memory fake in tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::messages::MessageRole;

/// Raw response body, delivered in arbitrary-sized chunks
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// One role/content pair in a chat request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent the message
    pub role: MessageRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Prior messages, oldest first
    pub messages: Vec<ChatMessage>,
    /// Whether to stream the response as NDJSON
    pub stream: bool,
}

impl ChatRequest {
    /// Create a streaming chat request
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }

    /// Check the payload constraints before any network activity
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the model name is blank
    /// or there are no messages to send.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.model.trim().is_empty() {
            return Err(TransportError::InvalidRequest(
                "model must not be empty".to_string(),
            ));
        }
        if self.messages.is_empty() {
            return Err(TransportError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Information about an available model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier (unique key)
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count as reported by the backend, e.g. "8B"
    pub parameter_size: Option<String>,
}

impl ModelDescriptor {
    /// Create a descriptor with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            parameter_size: None,
        }
    }

    /// Set the size in bytes
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Human-readable size, e.g. "4.7 GB"
    #[must_use]
    pub fn display_size(&self) -> Option<String> {
        self.size.map(format_size)
    }
}

/// Format a byte count using decimal units
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Chat transport trait
///
/// Implement this trait to talk to a different backend or to stand in for
/// one in tests.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Get the transport name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check whether the backend is reachable
    ///
    /// Never fails: any error collapses to `false`.
    async fn probe(&self) -> bool;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError>;

    /// Submit a chat request and return the streaming response body
    ///
    /// Connection establishment is retried with backoff; once the response
    /// headers arrive no retry occurs. The returned stream yields
    /// [`TransportError::Cancelled`] if `cancel` fires while it is read.
    async fn post_chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError>;
}

#[async_trait]
impl<T: ChatTransport + ?Sized> ChatTransport for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn probe(&self) -> bool {
        (**self).probe().await
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError> {
        (**self).list_models().await
    }

    async fn post_chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        (**self).post_chat(request, cancel).await
    }
}

/// Wrap a byte stream so it ends with [`TransportError::Cancelled`] as soon
/// as `cancel` fires
///
/// The inner stream (and with it the connection) is dropped on cancellation.
pub fn cancellable(stream: ByteStream, cancel: CancellationToken) -> ByteStream {
    futures::stream::unfold(Some((stream, cancel)), |state| async move {
        let Some((mut stream, cancel)) = state else {
            return None;
        };
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            item = stream.next() => Some(item),
        };
        match next {
            None => Some((Err(TransportError::Cancelled), None)),
            Some(Some(item)) => Some((item, Some((stream, cancel)))),
            Some(None) => None,
        }
    })
    .boxed()
}
