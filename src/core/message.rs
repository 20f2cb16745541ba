use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ChatMessage;

/// Unique, time-based identifier for a transcript entry. Assigned once at
/// creation, never reused within a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
}

impl Author {
    pub fn as_api_role(self) -> &'static str {
        match self {
            Author::User => "user",
            Author::Assistant => "assistant",
        }
    }
}

/// A transcript entry. An assistant reply starts life as a pending
/// placeholder whose content is rewritten in place while tokens stream in;
/// it is finalized exactly once, or removed if the round fails. User
/// messages are created directly in terminal state.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    pub source_model: Option<String>,
    pub is_pending: bool,
    pub is_error: bool,
}

impl Message {
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            author: Author::User,
            created_at: Utc::now(),
            source_model: None,
            is_pending: false,
            is_error: false,
        }
    }

    /// Placeholder for an in-flight assistant reply.
    pub fn pending(id: MessageId) -> Self {
        Self {
            id,
            content: String::new(),
            author: Author::Assistant,
            created_at: Utc::now(),
            source_model: None,
            is_pending: true,
            is_error: false,
        }
    }

    /// Inline error bubble, visible in the transcript but never sent to a
    /// model and never part of a round's result.
    pub fn error(id: MessageId, content: impl Into<String>, source_model: Option<&str>) -> Self {
        Self {
            id,
            content: content.into(),
            author: Author::Assistant,
            created_at: Utc::now(),
            source_model: source_model.map(str::to_string),
            is_pending: false,
            is_error: true,
        }
    }

    /// Strips bookkeeping down to the role/content pair sent on the wire.
    /// Pending and error entries carry no conversational weight and yield
    /// nothing.
    pub fn as_turn(&self) -> Option<ConversationTurn> {
        if self.is_pending || self.is_error {
            return None;
        }
        Some(ConversationTurn {
            role: self.author,
            content: self.content.clone(),
        })
    }
}

/// One entry of the linear history sent to a model on every call.
/// Immutable once constructed for a given call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Author,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Author::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Author::Assistant,
            content: content.into(),
        }
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.as_api_role().to_string(),
            content: self.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_are_terminal_on_creation() {
        let msg = Message::user(MessageId(1), "hello");
        assert!(!msg.is_pending);
        assert!(!msg.is_error);
        assert_eq!(msg.author, Author::User);
    }

    #[test]
    fn pending_and_error_entries_yield_no_turn() {
        assert!(Message::pending(MessageId(1)).as_turn().is_none());
        assert!(Message::error(MessageId(2), "boom", Some("m")).as_turn().is_none());
    }

    #[test]
    fn finalized_assistant_entry_yields_assistant_turn() {
        let mut msg = Message::pending(MessageId(3));
        msg.content = "answer".to_string();
        msg.is_pending = false;
        let turn = msg.as_turn().expect("expected a turn");
        assert_eq!(turn.role, Author::Assistant);
        assert_eq!(turn.content, "answer");
    }

    #[test]
    fn turns_map_to_api_roles() {
        assert_eq!(ConversationTurn::user("q").to_chat_message().role, "user");
        assert_eq!(
            ConversationTurn::assistant("a").to_chat_message().role,
            "assistant"
        );
    }
}
