//! Error Types
//!
//! Two layers of errors flow through the pipeline:
//!
//! - [`TransportError`]: what the HTTP layer can report (connection, status,
//!   mid-stream read failures, cancellation).
//! - [`ChatError`]: the user-facing taxonomy the generation session and the
//!   controller surface. Line-level parse failures never reach this type; the
//!   decoder logs and drops them.

use thiserror::Error;

/// Errors raised by a [`crate::backend::ChatTransport`]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be established, retries included
    #[error("Could not connect to backend after {attempts} attempt(s): {message}")]
    Connection {
        /// Number of attempts made before giving up
        attempts: u32,
        /// Last underlying error
        message: String,
    },

    /// The response stream failed after it had begun
    #[error("Stream interrupted: {0}")]
    Stream(String),

    /// The backend answered with a non-success status
    #[error("Backend returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Backend-provided error text, or the status reason
        message: String,
    },

    /// The request payload was rejected before any network activity
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller's cancellation token fired
    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether this error is a cancellation rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// User-visible chat errors
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    /// Could not reach the backend after exhausting retries
    #[error("Could not reach the model server ({0}). Check that it is running and try again.")]
    Connection(String),

    /// The response stream broke after it had started
    #[error("Response interrupted: {0}")]
    Stream(String),

    /// The backend reported an explicit error
    #[error("{0}")]
    Model(String),

    /// The stream ended without content and without a completion signal
    #[error("No response received from the model")]
    NoResponse,

    /// Regeneration was requested with no user message to answer
    #[error("Cannot regenerate: no previous message found")]
    NoPriorMessage,

    /// No model has been selected yet
    #[error("No model selected")]
    NoModelSelected,

    /// The requested model is not in the discovered catalogue
    #[error("Model '{0}' is not available")]
    UnknownModel(String),

    /// The user message was empty or whitespace only
    #[error("Message is empty")]
    EmptyMessage,

    /// The model server did not answer the status probe
    #[error("Ollama server is offline")]
    Offline,

    /// The request payload was malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ChatError {
    /// Classify a transport failure into the user-facing taxonomy
    ///
    /// Returns `None` for cancellation, which is an outcome and not an error.
    #[must_use]
    pub fn from_transport(error: TransportError) -> Option<Self> {
        match error {
            TransportError::Connection { message, .. } => Some(Self::Connection(message)),
            TransportError::Stream(message) => Some(Self::Stream(message)),
            TransportError::Status { message, .. } => Some(Self::Model(message)),
            TransportError::InvalidRequest(message) => Some(Self::InvalidRequest(message)),
            TransportError::Cancelled => None,
        }
    }

    /// Whether retrying the same action could plausibly succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Stream(_) | Self::Offline)
    }
}
