//! Generation Session
//!
//! One end-to-end generation attempt: open a placeholder assistant message,
//! submit the request, fold each text fragment into the conversation, and
//! resolve to exactly one terminal outcome.
//!
//! # State Machine
//!
//! ```text
//!  Idle ──run()──► Active ──┬── Done / end of text ──► Completed
//!                           ├── cancel handle fired ─► Cancelled
//!                           └── error of any kind ───► Failed(ChatError)
//! ```
//!
//! A session is Idle until `run` and Active while it runs; the terminal
//! state is reported through [`SessionOutcome::state`].
//!
//! `run` consumes the session, so a finished session cannot be resumed, and
//! the session mutably borrows the [`Conversation`] for its whole lifetime,
//! so nothing else can write to it while fragments are arriving.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::backend::{ChatRequest, ChatTransport};
use crate::conversation::Conversation;
use crate::error::{ChatError, TransportError};
use crate::messages::MessageId;
use crate::streaming::{DecodeError, FragmentEvent, FragmentStream};

/// Lifecycle of a generation session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, request not yet issued
    Idle,
    /// Streaming
    Active,
    /// Finished normally
    Completed,
    /// Stopped by the caller
    Cancelled,
    /// Ended with an error
    Failed,
}

impl SessionState {
    /// Whether this is a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Terminal outcome of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The model finished its answer
    Completed,
    /// The caller cancelled; not an error
    Cancelled,
    /// The generation failed; partial content is kept
    Failed(ChatError),
}

impl SessionOutcome {
    /// The terminal state this outcome corresponds to
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self {
            Self::Completed => SessionState::Completed,
            Self::Cancelled => SessionState::Cancelled,
            Self::Failed(_) => SessionState::Failed,
        }
    }

    /// The error to surface to the user, if any
    #[must_use]
    pub fn error(&self) -> Option<&ChatError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    fn from_transport(error: TransportError) -> Self {
        ChatError::from_transport(error).map_or(Self::Cancelled, Self::Failed)
    }
}

/// Handle that cancels a running generation
///
/// Cloneable and usable from other tasks (e.g. a Ctrl-C handler).
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl From<CancellationToken> for CancelHandle {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}

/// Summary of a finished session
#[derive(Clone, Debug)]
pub struct SessionReport {
    /// Terminal outcome
    pub outcome: SessionOutcome,
    /// The assistant message the session wrote into
    pub message_id: MessageId,
    /// Number of text fragments applied
    pub fragments: u32,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// A single generation against a conversation
pub struct GenerationSession<'a, T: ChatTransport + ?Sized> {
    transport: &'a T,
    conversation: &'a mut Conversation,
    request: ChatRequest,
    token: CancellationToken,
}

impl<'a, T: ChatTransport + ?Sized> GenerationSession<'a, T> {
    /// Prepare a session; nothing happens until [`run`](Self::run)
    pub fn new(
        transport: &'a T,
        conversation: &'a mut Conversation,
        request: ChatRequest,
        token: CancellationToken,
    ) -> Self {
        Self {
            transport,
            conversation,
            request,
            token,
        }
    }

    /// Handle that cancels this session
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    /// The request this session will submit
    #[must_use]
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }

    /// Run the generation to its terminal outcome
    ///
    /// `on_fragment` is called once per applied text fragment, in order,
    /// after the fragment has been appended to the open message.
    pub async fn run<F>(mut self, mut on_fragment: F) -> SessionReport
    where
        F: FnMut(&str),
    {
        let started = Instant::now();

        let message_id = self.conversation.open_assistant_message();
        tracing::debug!(
            message_id = %message_id,
            model = %self.request.model,
            history = self.request.messages.len(),
            "Generation started"
        );

        let mut fragments = 0u32;
        let outcome = self.drive(message_id, &mut fragments, &mut on_fragment).await;

        self.conversation.close_open_message(message_id);

        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            SessionOutcome::Completed => {
                tracing::info!(fragments, duration_ms, "Generation completed");
            }
            SessionOutcome::Cancelled => {
                tracing::info!(fragments, duration_ms, "Generation cancelled");
            }
            SessionOutcome::Failed(error) => {
                tracing::warn!(fragments, duration_ms, error = %error, "Generation failed");
            }
        }

        SessionReport {
            outcome,
            message_id,
            fragments,
            duration_ms,
        }
    }

    async fn drive<F>(
        &mut self,
        message_id: MessageId,
        fragments: &mut u32,
        on_fragment: &mut F,
    ) -> SessionOutcome
    where
        F: FnMut(&str),
    {
        let body = match self.transport.post_chat(&self.request, &self.token).await {
            Ok(body) => body,
            Err(e) => return SessionOutcome::from_transport(e),
        };

        let mut stream = FragmentStream::new(body);
        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => return SessionOutcome::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(FragmentEvent::Text(text))) => {
                    if self.token.is_cancelled() {
                        return SessionOutcome::Cancelled;
                    }
                    if let Err(stale) = self.conversation.apply_fragment(message_id, &text) {
                        tracing::warn!(error = %stale, "Dropping fragment for superseded message");
                        return SessionOutcome::Cancelled;
                    }
                    *fragments += 1;
                    on_fragment(&text);
                }
                Some(Ok(FragmentEvent::Error { message })) => {
                    return SessionOutcome::Failed(ChatError::Model(message));
                }
                Some(Ok(FragmentEvent::Done)) => return SessionOutcome::Completed,
                Some(Err(DecodeError::NoResponse)) => {
                    return SessionOutcome::Failed(ChatError::NoResponse);
                }
                Some(Err(DecodeError::Transport(e))) => return SessionOutcome::from_transport(e),
                None => {
                    tracing::debug!("Stream ended without completion flag");
                    return SessionOutcome::Completed;
                }
            }
        }
    }
}
