//! Direct messages between agents.
//!
//! Messages are addressed by handle when sent and stored with resolved
//! [`AgentId`]s. A recipient acknowledges a message, optionally with a
//! response.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentId;

/// Maximum allowed message or response length in UTF-16 code units.
pub const MAX_MESSAGE_LENGTH: usize = 5000;

/// Message type used when the sender does not give one.
pub const DEFAULT_MESSAGE_TYPE: &str = "direct";

/// Unique identifier for a message (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message identifier.
    pub id: MessageId,
    /// Sending agent.
    pub from_agent_id: AgentId,
    /// Receiving agent.
    pub to_agent_id: AgentId,
    /// Free-form label such as `direct`, `handoff` or `question`.
    pub message_type: String,
    /// Trimmed message body.
    pub content: String,
    /// Whether the recipient has acknowledged it.
    pub acknowledged: bool,
    /// The recipient's answer, if it gave one.
    pub response: Option<String>,
    /// Creation time (milliseconds since epoch).
    pub created_at: u64,
}

/// Payload for sending a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Sender handle, with or without `@`.
    pub from: String,
    /// Recipient handle, with or without `@`.
    pub to: String,
    /// Label; [`DEFAULT_MESSAGE_TYPE`] when blank.
    pub message_type: String,
    /// Message body.
    pub content: String,
}

/// Every message sent in one direction between two agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Sender of every message in the thread.
    pub from_agent_id: AgentId,
    /// Recipient of every message in the thread.
    pub to_agent_id: AgentId,
    /// Messages, newest first.
    pub messages: Vec<AgentMessage>,
}

impl Conversation {
    /// Creation time of the newest message.
    #[must_use]
    pub fn latest(&self) -> u64 {
        self.messages.first().map_or(0, |m| m.created_at)
    }
}

/// Groups messages by `(from, to)` pair.
///
/// Messages inside a conversation are newest first; conversations are
/// ordered by their newest message, most recent first.
#[must_use]
pub fn conversations(messages: Vec<AgentMessage>) -> Vec<Conversation> {
    let mut grouped: Vec<Conversation> = Vec::new();
    for message in messages {
        let existing = grouped.iter_mut().find(|c| {
            c.from_agent_id == message.from_agent_id && c.to_agent_id == message.to_agent_id
        });
        match existing {
            Some(conversation) => conversation.messages.push(message),
            None => grouped.push(Conversation {
                from_agent_id: message.from_agent_id.clone(),
                to_agent_id: message.to_agent_id.clone(),
                messages: vec![message],
            }),
        }
    }
    for conversation in &mut grouped {
        conversation
            .messages
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    }
    grouped.sort_by_key(|c| std::cmp::Reverse(c.latest()));
    grouped
}
