//! Transcript messages.
//!
//! Messages are append-only. Sequence numbers start at 1 and are
//! strictly increasing and gap-free within a session.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{SessionId, Timestamp};

/// Who authored a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The trainee.
    User,
    /// The simulated counterpart.
    Assistant,
}

impl MessageRole {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message that has not been persisted yet.
///
/// The store assigns the sequence number and timestamp on append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
}

impl NewMessage {
    /// A trainee message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// A counterpart message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A persisted transcript message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    /// 1-based position within the session.
    pub seq: u32,
    pub created_at: Timestamp,
}

/// Checks that `messages` carry sequence numbers `1..=n` in order.
pub fn is_gap_free(messages: &[Message]) -> bool {
    messages
        .iter()
        .enumerate()
        .all(|(i, m)| m.seq as usize == i + 1)
}
