//! Conversation state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitewright_providers::{Message, ProviderKind, Role};
use uuid::Uuid;

const PENDING_PREFIX: &str = "pending-";
const MESSAGE_PREFIX: &str = "msg-";

/// Lifecycle of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Complete,
    /// Assistant reply still receiving chunks
    Streaming,
    /// Stream failed after partial output was shown
    Interrupted,
    /// Fixed reply recorded while no provider was available
    Offline,
}

/// A single turn in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Provider that produced an assistant reply, when known
    pub provider: Option<ProviderKind>,
    pub status: MessageStatus,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: format!("{}{}", MESSAGE_PREFIX, Uuid::new_v4()),
            role,
            content: content.into(),
            created_at: Utc::now(),
            provider: None,
            status,
        }
    }

    /// Whether this message still has a placeholder id
    pub fn is_pending(&self) -> bool {
        self.id.starts_with(PENDING_PREFIX)
    }

    /// Whether this turn belongs in the history sent upstream
    fn is_sendable(&self) -> bool {
        self.status == MessageStatus::Complete && !self.content.trim().is_empty()
    }
}

/// Ordered list of chat messages
///
/// Only the trailing assistant message, while it is streaming, is ever
/// rewritten. Everything before it is append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Record the user's turn
    pub fn push_user(&mut self, content: impl Into<String>) -> &ChatMessage {
        self.push(ChatMessage::new(Role::User, content, MessageStatus::Complete))
    }

    /// Record a finished assistant turn
    pub fn push_assistant(
        &mut self,
        content: impl Into<String>,
        provider: Option<ProviderKind>,
        status: MessageStatus,
    ) -> &ChatMessage {
        let mut message = ChatMessage::new(Role::Assistant, content, status);
        message.provider = provider;
        self.push(message)
    }

    fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Append an empty streaming placeholder and return its id
    pub fn begin_streaming(&mut self) -> String {
        let mut message = ChatMessage::new(Role::Assistant, String::new(), MessageStatus::Streaming);
        message.id = format!("{}{}", PENDING_PREFIX, Uuid::new_v4());
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    fn streaming_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant && m.status == MessageStatus::Streaming)
    }

    /// The placeholder currently receiving chunks
    pub fn streaming(&self) -> Option<&ChatMessage> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant && m.status == MessageStatus::Streaming)
    }

    /// Append partial text to the streaming placeholder
    ///
    /// Returns the updated message, or `None` when nothing is streaming.
    pub fn append_to_streaming(&mut self, delta: &str) -> Option<&ChatMessage> {
        let message = self.streaming_mut()?;
        message.content.push_str(delta);
        Some(message)
    }

    /// Complete the streaming placeholder, giving it a stable id
    pub fn finish_streaming(&mut self, provider: Option<ProviderKind>) -> Option<&ChatMessage> {
        let message = self.streaming_mut()?;
        message.id = format!("{}{}", MESSAGE_PREFIX, Uuid::new_v4());
        message.status = MessageStatus::Complete;
        message.provider = provider;
        Some(message)
    }

    /// Keep the partial output of a failed stream, marked as interrupted
    pub fn interrupt_streaming(&mut self) -> Option<&ChatMessage> {
        let message = self.streaming_mut()?;
        message.id = format!("{}{}", MESSAGE_PREFIX, Uuid::new_v4());
        message.status = MessageStatus::Interrupted;
        Some(message)
    }

    /// Drop the streaming placeholder; returns whether one was present
    pub fn discard_streaming(&mut self) -> bool {
        if self.streaming().is_some() {
            self.messages.pop();
            true
        } else {
            false
        }
    }

    /// The most recent `max` sendable turns, oldest first
    ///
    /// Offline and interrupted turns, empty turns and the streaming
    /// placeholder are never sent upstream.
    pub fn history(&self, max: usize) -> Vec<Message> {
        let sendable: Vec<&ChatMessage> = self.messages.iter().filter(|m| m.is_sendable()).collect();
        let start = sendable.len().saturating_sub(max);
        sendable[start..]
            .iter()
            .map(|m| Message::new(m.role, m.content.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_placeholder_lifecycle() {
        let mut conversation = Conversation::new();
        conversation.push_user("Build me a bakery site");

        let pending = conversation.begin_streaming();
        assert!(pending.starts_with("pending-"));
        assert!(conversation.streaming().unwrap().is_pending());

        conversation.append_to_streaming("Hel");
        conversation.append_to_streaming("lo");
        let finished = conversation
            .finish_streaming(Some(ProviderKind::Anthropic))
            .unwrap()
            .clone();

        assert_eq!(finished.content, "Hello");
        assert_eq!(finished.status, MessageStatus::Complete);
        assert!(finished.id.starts_with("msg-"));
        assert_ne!(finished.id, pending);
        assert_eq!(finished.provider, Some(ProviderKind::Anthropic));
        assert!(conversation.streaming().is_none());
    }

    #[test]
    fn test_only_trailing_streaming_message_is_mutable() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        assert!(conversation.append_to_streaming("x").is_none());
        assert!(conversation.finish_streaming(None).is_none());
        assert_eq!(conversation.messages()[0].content, "hi");
    }

    #[test]
    fn test_interrupt_keeps_partial_output() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        conversation.begin_streaming();
        conversation.append_to_streaming("Partial");

        let interrupted = conversation.interrupt_streaming().unwrap();
        assert_eq!(interrupted.status, MessageStatus::Interrupted);
        assert_eq!(interrupted.content, "Partial");
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_discard_removes_placeholder() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        conversation.begin_streaming();

        assert!(conversation.discard_streaming());
        assert!(!conversation.discard_streaming());
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn test_history_skips_offline_and_interrupted() {
        let mut conversation = Conversation::new();
        conversation.push_user("first");
        conversation.push_assistant("<html></html>", None, MessageStatus::Offline);
        conversation.push_user("second");
        conversation.push_assistant("partial", None, MessageStatus::Interrupted);
        conversation.push_user("third");
        conversation.begin_streaming();

        let history = conversation.history(40);
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert!(history.iter().all(|m| m.role == Role::User));
    }

    #[test]
    fn test_history_window_keeps_most_recent() {
        let mut conversation = Conversation::new();
        for i in 0..10 {
            conversation.push_user(format!("u{}", i));
            conversation.push_assistant(format!("a{}", i), None, MessageStatus::Complete);
        }

        let history = conversation.history(3);
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a8", "u9", "a9"]);
        assert_eq!(history[0].role, Role::Assistant);
    }
}
