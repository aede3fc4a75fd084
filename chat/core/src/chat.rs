//! Chat Controller
//!
//! The handle a presentation surface owns. It holds the conversation, the
//! discovered model catalogue, the selected model, the cancel handle of the
//! current generation, and the user-visible error slot.
//!
//! # Design Philosophy
//!
//! The controller is UI-agnostic. A surface drives it through a handful of
//! operations (`send`, `regenerate`, `cancel`, `refresh_models`,
//! `select_model`, `clear`) and reads state back through borrowed views.
//! Tokens reach the surface through the `on_fragment` callback as they are
//! applied.
//!
//! Starting a generation returns a [`PendingGeneration`] that mutably borrows
//! the controller. Take its [`CancelHandle`] before awaiting
//! [`PendingGeneration::run`] to cancel from another task (e.g. Ctrl-C).

use tokio_util::sync::CancellationToken;

use crate::backend::{ChatRequest, ChatTransport, ModelDescriptor};
use crate::conversation::Conversation;
use crate::error::ChatError;
use crate::messages::MessageRole;
use crate::session::{CancelHandle, GenerationSession, SessionOutcome, SessionReport};

/// Owner of conversation state and the model catalogue
pub struct ChatController<T: ChatTransport> {
    transport: T,
    conversation: Conversation,
    /// Models discovered by the last successful refresh
    models: Vec<ModelDescriptor>,
    selected_model: Option<String>,
    /// Model to auto-select after a refresh, when available
    preferred_model: Option<String>,
    /// Cancel handle of the most recent generation
    current: Option<CancelHandle>,
    last_error: Option<ChatError>,
}

impl<T: ChatTransport> ChatController<T> {
    /// Create a controller over the given transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            conversation: Conversation::new(),
            models: Vec::new(),
            selected_model: None,
            preferred_model: None,
            current: None,
            last_error: None,
        }
    }

    /// Prefer this model when auto-selecting after a refresh
    #[must_use]
    pub fn with_preferred_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }

    /// The transport this controller talks through
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read-only view of the conversation
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Models from the last refresh
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Currently selected model
    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    /// The error surfaced by the last failed operation
    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    /// Dismiss the surfaced error
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Probe the backend and replace the model catalogue
    ///
    /// Keeps the current selection if it is still available, otherwise picks
    /// the preferred model or the first one listed.
    pub async fn refresh_models(&mut self) -> Result<&[ModelDescriptor], ChatError> {
        if !self.transport.probe().await {
            tracing::warn!(transport = self.transport.name(), "Backend did not answer probe");
            return Err(self.surface(ChatError::Offline));
        }

        let models = match self.transport.list_models().await {
            Ok(models) => models,
            Err(e) => {
                let error = ChatError::from_transport(e)
                    .unwrap_or_else(|| ChatError::Connection("model listing cancelled".to_string()));
                return Err(self.surface(error));
            }
        };

        tracing::info!(count = models.len(), "Model catalogue refreshed");
        self.models = models;
        self.auto_select();
        Ok(&self.models)
    }

    fn auto_select(&mut self) {
        let keep = self
            .selected_model
            .as_deref()
            .is_some_and(|name| self.is_known(name));
        if keep {
            return;
        }

        let preferred = self
            .preferred_model
            .as_deref()
            .filter(|name| self.is_known(name));
        self.selected_model = preferred
            .or_else(|| self.models.first().map(|m| m.name.as_str()))
            .map(str::to_string);

        if let Some(model) = &self.selected_model {
            tracing::debug!(model = %model, "Model auto-selected");
        }
    }

    fn is_known(&self, name: &str) -> bool {
        self.models.iter().any(|m| m.name == name)
    }

    /// Select a model from the catalogue
    pub fn select_model(&mut self, name: &str) -> Result<(), ChatError> {
        if !self.is_known(name) {
            return Err(ChatError::UnknownModel(name.to_string()));
        }
        self.selected_model = Some(name.to_string());
        Ok(())
    }

    /// Cancel the current generation, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.cancel();
        }
    }

    /// Cancel the previous generation and close a message it left open
    ///
    /// A generation whose future was dropped mid-stream never reaches its
    /// own cleanup, so its placeholder is closed here with whatever content
    /// it holds.
    fn supersede(&mut self) {
        self.cancel();
        if let Some(id) = self.conversation.open_message().map(|m| m.id) {
            tracing::debug!(message_id = %id, "Closing message of superseded generation");
            self.conversation.close_open_message(id);
        }
    }

    /// Cancel any generation and remove every message
    pub fn clear(&mut self) {
        self.cancel();
        self.conversation.clear();
        self.last_error = None;
    }

    /// Append a user message and prepare a generation for it
    pub fn start_send(&mut self, text: &str) -> Result<PendingGeneration<'_, T>, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let model = self.checked_model()?;

        self.supersede();
        self.last_error = None;
        self.conversation.append_user_message(text);
        Ok(self.prepare(model))
    }

    /// Drop the last answer and prepare a generation that replaces it
    ///
    /// Fails with [`ChatError::NoPriorMessage`] before touching anything when
    /// there is no user message to answer.
    pub fn start_regenerate(&mut self) -> Result<PendingGeneration<'_, T>, ChatError> {
        if self.conversation.last_user_message().is_none() {
            return Err(self.surface(ChatError::NoPriorMessage));
        }
        let model = self.checked_model()?;

        self.supersede();
        self.last_error = None;
        if self
            .conversation
            .last()
            .is_some_and(|m| m.role == MessageRole::Assistant)
        {
            self.conversation.remove_last_message();
        }
        Ok(self.prepare(model))
    }

    /// Send a message and stream the answer
    pub async fn send<F>(&mut self, text: &str, on_fragment: F) -> Result<SessionOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        let pending = self.start_send(text)?;
        Ok(pending.run(on_fragment).await.outcome)
    }

    /// Regenerate the last answer
    pub async fn regenerate<F>(&mut self, on_fragment: F) -> Result<SessionOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        let pending = self.start_regenerate()?;
        Ok(pending.run(on_fragment).await.outcome)
    }

    fn checked_model(&mut self) -> Result<String, ChatError> {
        let Some(model) = self.selected_model.clone() else {
            return Err(self.surface(ChatError::NoModelSelected));
        };
        if !self.is_known(&model) {
            return Err(self.surface(ChatError::UnknownModel(model)));
        }
        Ok(model)
    }

    fn prepare(&mut self, model: String) -> PendingGeneration<'_, T> {
        let token = CancellationToken::new();
        let handle = CancelHandle::from(token.clone());
        self.current = Some(handle);
        let request = ChatRequest::new(model, self.conversation.history());
        PendingGeneration {
            controller: self,
            request,
            token,
        }
    }

    fn surface(&mut self, error: ChatError) -> ChatError {
        self.last_error = Some(error.clone());
        error
    }
}

/// A generation that has been set up but not yet run
pub struct PendingGeneration<'a, T: ChatTransport> {
    controller: &'a mut ChatController<T>,
    request: ChatRequest,
    token: CancellationToken,
}

impl<T: ChatTransport> PendingGeneration<'_, T> {
    /// Handle that cancels this generation
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::from(self.token.clone())
    }

    /// The request that will be submitted
    #[must_use]
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }

    /// Stream the answer into the conversation
    ///
    /// A failure is stored in the controller's error slot; cancellation is
    /// not an error and leaves the slot empty.
    pub async fn run<F>(self, on_fragment: F) -> SessionReport
    where
        F: FnMut(&str),
    {
        let controller = self.controller;
        let report = GenerationSession::new(
            &controller.transport,
            &mut controller.conversation,
            self.request,
            self.token,
        )
        .run(on_fragment)
        .await;

        controller.current = None;
        if let SessionOutcome::Failed(error) = &report.outcome {
            controller.last_error = Some(error.clone());
        }
        report
    }
}
