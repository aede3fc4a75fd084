//! Conversation State
//!
//! The ordered message log a chat surface renders. Messages are appended in
//! order and never deduplicated; the only amendments are fragments applied to
//! the single open assistant message and removal of the trailing message for
//! regeneration.
//!
//! # Single Writer
//!
//! Operations tied to an in-progress generation (opening the placeholder,
//! applying fragments, closing it) are crate-private and only reached through
//! [`crate::session::GenerationSession`]. The session mutably borrows the
//! conversation for its whole lifetime, so user appends and `clear` cannot
//! interleave with a generation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ChatMessage;
use crate::messages::{MessageId, MessageRole};

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was created (Unix timestamp ms)
    pub timestamp: u64,
    /// Whether the message is still receiving fragments
    pub open: bool,
}

impl Message {
    fn new(role: MessageRole, content: String) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: now_ms(),
            open: false,
        }
    }

    fn placeholder() -> Self {
        Self {
            open: true,
            ..Self::new(MessageRole::Assistant, String::new())
        }
    }

    /// Wire representation of this message
    #[must_use]
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A fragment addressed a message that is no longer the open one
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("message {0} is not the open message")]
pub struct StaleMessage(pub MessageId);

/// The conversation log
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    /// The assistant message currently receiving fragments
    open_id: Option<MessageId>,
}

impl Conversation {
    /// Create an empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user message
    pub fn append_user_message(&mut self, content: impl Into<String>) -> MessageId {
        debug_assert!(
            self.open_id.is_none(),
            "user message appended while a generation holds the open message"
        );
        let msg = Message::new(MessageRole::User, content.into());
        let id = msg.id;
        self.messages.push(msg);
        id
    }

    /// Open an empty assistant message to receive fragments
    pub(crate) fn open_assistant_message(&mut self) -> MessageId {
        // A superseded generation may have left its message open.
        if let Some(stale) = self.open_id.take() {
            self.close(stale);
        }
        let msg = Message::placeholder();
        let id = msg.id;
        self.open_id = Some(id);
        self.messages.push(msg);
        id
    }

    /// Append a fragment to the open message
    ///
    /// Fails if `id` is not the open message, so a superseded generation can
    /// never write into a conversation that has moved on.
    pub(crate) fn apply_fragment(&mut self, id: MessageId, text: &str) -> Result<&Message, StaleMessage> {
        if self.open_id != Some(id) {
            return Err(StaleMessage(id));
        }
        match self.messages.last_mut() {
            Some(msg) if msg.id == id => {
                msg.content.push_str(text);
                Ok(msg)
            }
            _ => Err(StaleMessage(id)),
        }
    }

    /// Close the open message, keeping whatever content it accumulated
    pub(crate) fn close_open_message(&mut self, id: MessageId) -> bool {
        if self.open_id != Some(id) {
            return false;
        }
        self.open_id = None;
        self.close(id)
    }

    fn close(&mut self, id: MessageId) -> bool {
        match self.messages.iter_mut().rev().find(|m| m.id == id) {
            Some(msg) => {
                msg.open = false;
                true
            }
            None => false,
        }
    }

    /// Remove and return the most recent message
    pub fn remove_last_message(&mut self) -> Option<Message> {
        let removed = self.messages.pop()?;
        if self.open_id == Some(removed.id) {
            self.open_id = None;
        }
        Some(removed)
    }

    /// Remove every message
    pub fn clear(&mut self) {
        self.messages.clear();
        self.open_id = None;
    }

    /// All messages in insertion order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Iterate over messages in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// The message currently receiving fragments
    #[must_use]
    pub fn open_message(&self) -> Option<&Message> {
        let id = self.open_id?;
        self.messages.iter().rev().find(|m| m.id == id)
    }

    /// The most recent message
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent user message
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == MessageRole::User)
    }

    /// Messages to submit to the backend, excluding the open placeholder
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| Some(m.id) != self.open_id)
            .map(Message::to_chat_message)
            .collect()
    }

    /// Get message by ID
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Get current timestamp in milliseconds
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_message_receives_fragments() {
        let mut conversation = Conversation::new();
        conversation.append_user_message("Hi");

        let id = conversation.open_assistant_message();
        assert_eq!(conversation.open_message().map(|m| m.id), Some(id));

        conversation.apply_fragment(id, "Hel").unwrap();
        conversation.apply_fragment(id, "lo").unwrap();
        assert!(conversation.close_open_message(id));

        let msg = conversation.get(id).unwrap();
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.role, MessageRole::Assistant);
        assert!(!msg.open);
        assert!(conversation.open_message().is_none());
    }

    #[test]
    fn test_fragment_to_stale_message_is_rejected() {
        let mut conversation = Conversation::new();
        conversation.append_user_message("Hi");
        let old = conversation.open_assistant_message();
        conversation.apply_fragment(old, "partial").unwrap();

        // A new generation supersedes the old one
        conversation.remove_last_message();
        let new = conversation.open_assistant_message();

        assert_eq!(conversation.apply_fragment(old, "late"), Err(StaleMessage(old)));
        assert!(!conversation.close_open_message(old));
        assert_eq!(conversation.get(new).unwrap().content, "");
    }

    #[test]
    fn test_opening_closes_previous_open_message() {
        let mut conversation = Conversation::new();
        let first = conversation.open_assistant_message();
        let second = conversation.open_assistant_message();

        assert!(!conversation.get(first).unwrap().open);
        assert!(conversation.get(second).unwrap().open);
        assert!(conversation.apply_fragment(first, "x").is_err());
    }

    #[test]
    fn test_history_excludes_placeholder() {
        let mut conversation = Conversation::new();
        conversation.append_user_message("Question");
        conversation.open_assistant_message();

        let history = conversation.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[0].content, "Question");
    }

    #[test]
    fn test_remove_last_and_clear() {
        let mut conversation = Conversation::new();
        conversation.append_user_message("one");
        let open = conversation.open_assistant_message();

        let removed = conversation.remove_last_message().unwrap();
        assert_eq!(removed.id, open);
        assert!(conversation.open_message().is_none());
        assert_eq!(conversation.len(), 1);

        conversation.clear();
        assert!(conversation.is_empty());
        assert!(conversation.remove_last_message().is_none());
    }

    #[test]
    fn test_last_user_message() {
        let mut conversation = Conversation::new();
        assert!(conversation.last_user_message().is_none());

        conversation.append_user_message("first");
        let id = conversation.open_assistant_message();
        conversation.close_open_message(id);
        conversation.append_user_message("second");

        assert_eq!(conversation.last_user_message().unwrap().content, "second");
    }

    #[test]
    fn test_ids_increase_in_insertion_order() {
        let mut conversation = Conversation::new();
        conversation.append_user_message("a");
        conversation.append_user_message("b");
        let ids: Vec<_> = conversation.iter().map(|m| m.id).collect();
        assert!(ids[0] < ids[1]);
    }
}
