//! Conversation log: the ordered message history behind one chat session.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire-format role string.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in the conversation.
///
/// Content is mutable only through [`ConversationLog`], which restricts
/// growth to the newest message (the one a stream is filling in).
#[derive(Debug, Clone)]
pub struct Message {
    id: Uuid,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            created_at: Utc::now(),
        }
    }

    /// Stable unique ID for this message.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True if the content is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Ordered message history for one session.
#[derive(Debug, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user message; returns its ID.
    pub fn push_user(&mut self, content: impl Into<String>) -> Uuid {
        let message = Message::new(Role::User, content.into());
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Append an empty assistant message for a stream to fill in; returns its ID.
    pub fn push_assistant_placeholder(&mut self) -> Uuid {
        let message = Message::new(Role::Assistant, String::new());
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Append a chunk to the newest message's content.
    ///
    /// Only the newest message may grow; returns false (without mutating)
    /// if `id` does not name the newest message.
    pub fn append_content(&mut self, id: Uuid, chunk: &str) -> bool {
        match self.messages.last_mut() {
            Some(last) if last.id == id => {
                last.content.push_str(chunk);
                true
            }
            _ => false,
        }
    }

    /// Replace a message's content wholesale (error surfacing on a failed
    /// stream). Returns false if no message has this ID.
    pub fn set_content(&mut self, id: Uuid, content: String) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.content = content;
                true
            }
            None => false,
        }
    }

    /// Remove the message with this ID if its content is still empty.
    ///
    /// Used to discard the assistant placeholder when a stream is cancelled
    /// before any content arrived. Returns true if a message was removed.
    pub fn remove_if_empty(&mut self, id: Uuid) -> bool {
        match self.messages.iter().position(|m| m.id == id) {
            Some(index) if self.messages[index].content.is_empty() => {
                self.messages.remove(index);
                true
            }
            _ => false,
        }
    }

    /// Look up a message's content by ID.
    pub fn content_of(&self, id: Uuid) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.content.as_str())
    }

    /// Messages with non-blank content, in order.
    ///
    /// Request payloads are built from this view so that the in-progress
    /// assistant placeholder (and any other empty message) never reaches
    /// the backend.
    pub fn non_blank(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.is_blank())
    }

    /// All messages, in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop the entire history.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
