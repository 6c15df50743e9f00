use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a message inside its conversation.
///
/// Ids start at 1 and grow by exactly one per appended message. `MessageId::NONE`
/// (0) stands for "no message yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const NONE: MessageId = MessageId(0);

    pub fn next(self) -> MessageId {
        MessageId(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who wrote a message. `User` is the viewing user, `Counterparty` the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "other")]
    Counterparty,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Counterparty => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Sender> {
        match value {
            "user" => Some(Sender::User),
            "other" => Some(Sender::Counterparty),
            _ => None,
        }
    }
}

/// A stored, immutable chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

/// Input handed to a `MessageStore` append. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub content: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

/// Durable directory entry for a conversation (seed/admin managed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_read_message_id: MessageId,
}

/// Conversation with its denormalized summary fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub display_name: String,
    /// Content of the newest message, empty until the first message.
    pub last_message: String,
    pub last_activity_at: DateTime<Utc>,
    pub last_message_id: MessageId,
    pub last_read_message_id: MessageId,
    pub unread_count: u32,
}

impl Conversation {
    /// Summary of a conversation with no messages.
    pub fn empty(record: &ConversationRecord) -> Self {
        Self {
            id: record.id,
            display_name: record.display_name.clone(),
            last_message: String::new(),
            last_activity_at: record.created_at,
            last_message_id: MessageId::NONE,
            last_read_message_id: record.last_read_message_id,
            unread_count: 0,
        }
    }

    /// Recompute the summary from the full ordered history.
    pub fn summarize(record: &ConversationRecord, messages: &[Message]) -> Self {
        let mut conversation = Self::empty(record);
        if let Some(last) = messages.last() {
            conversation.last_message = last.content.clone();
            conversation.last_activity_at = last.created_at;
            conversation.last_message_id = last.id;
        }
        // A watermark past the end (store lost messages) is clamped back.
        if conversation.last_read_message_id > conversation.last_message_id {
            conversation.last_read_message_id = conversation.last_message_id;
        }
        conversation.unread_count = messages
            .iter()
            .filter(|m| m.sender == Sender::Counterparty && m.id > record.last_read_message_id)
            .count() as u32;
        conversation
    }
}
