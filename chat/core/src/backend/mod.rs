//! Chat Backend Transport
//!
//! HTTP access to an Ollama-compatible chat server through a common trait.
//!
//! # Available Transports
//!
//! - **Ollama**: Local LLM server, directly or through a pass-through relay
//!
//! # Usage
//!
//! ```ignore
//! use chat_core::backend::{ChatMessage, ChatRequest, ChatTransport, OllamaTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! let transport = OllamaTransport::new("http://localhost:11434");
//! let request = ChatRequest::new("llama3.2", vec![ChatMessage::user("Hello!")]);
//! let body = transport.post_chat(&request, &CancellationToken::new()).await?;
//! ```

pub mod ollama;
mod retry;
mod traits;

pub use ollama::OllamaTransport;
pub use retry::{connect_with_retry, AttemptError, RetryPolicy};
pub use traits::{
    cancellable, format_size, ByteStream, ChatMessage, ChatRequest, ChatTransport,
    ModelDescriptor,
};
