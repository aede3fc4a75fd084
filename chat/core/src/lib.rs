//! Chat Core - Streaming Chat Pipeline for Ollama-Compatible Backends
//!
//! This crate turns a chat request into an incrementally growing assistant
//! message. It is independent of any UI: a terminal front end, a GUI or a
//! test harness drives it through [`ChatController`] and reads state back
//! through borrowed views.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Presentation Surface                        │
//! │        send / regenerate / cancel / refresh / select / clear      │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ on_fragment(&str)
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │                           CHAT CORE                               │
//! │  ┌────────────────────────────────────────────────────────────┐   │
//! │  │                     ChatController                          │   │
//! │  │   Conversation · model catalogue · error slot · cancel     │   │
//! │  └──────────────────────────┬─────────────────────────────────┘   │
//! │                             │                                     │
//! │  ┌──────────────────────────┴─────────────────────────────────┐   │
//! │  │                   GenerationSession                         │   │
//! │  │   Idle ─► Active ─► Completed | Cancelled | Failed          │   │
//! │  └───────┬──────────────────────────────────────┬─────────────┘   │
//! │          │ bytes                                │ fragments       │
//! │  ┌───────┴────────┐                    ┌────────┴────────┐        │
//! │  │ ChatTransport  │ ──── NDJSON ────►  │ FragmentStream  │        │
//! │  │ (retry, HTTP)  │                    │ (line decoder)  │        │
//! │  └────────────────┘                    └─────────────────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use chat_core::{ChatController, OllamaTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut chat = ChatController::new(OllamaTransport::default());
//!     chat.refresh_models().await.unwrap();
//!
//!     let outcome = chat
//!         .send("Why is the sky blue?", |token| print!("{token}"))
//!         .await
//!         .unwrap();
//!     println!("\n{outcome:?}");
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Transport trait and the Ollama HTTP client with connect retry
//! - [`streaming`]: NDJSON reassembly and fragment decoding
//! - [`session`]: One generation attempt and its terminal outcome
//! - [`conversation`]: The ordered message log
//! - [`chat`]: The controller a surface owns
//! - [`config`]: Layered configuration (CLI, env, TOML file, defaults)
//! - [`error`]: Transport and user-facing error types
//! - [`messages`]: Message identity and roles

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod messages;
pub mod session;
pub mod streaming;

// Re-exports for convenience
pub use backend::{
    ChatMessage, ChatRequest, ChatTransport, ModelDescriptor, OllamaTransport, RetryPolicy,
};
pub use chat::{ChatController, PendingGeneration};
pub use conversation::{Conversation, Message};
pub use error::{ChatError, TransportError};
pub use messages::{MessageId, MessageRole};
pub use session::{
    CancelHandle, GenerationSession, SessionOutcome, SessionReport, SessionState,
};
pub use streaming::{DecodeError, FragmentEvent, FragmentStream, NdjsonDecoder};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ChatConfig, ConfigError,
    ConfigOverrides, ConfigSource,
};
