//! Durable storage seams
//!
//! `MessageStore` owns message records; `ConversationDirectory` owns the
//! conversation entries created out-of-band. Both are provided in memory
//! and backed by SQLite.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::{ConversationId, ConversationRecord, Message, MessageId, NewMessage};
use async_trait::async_trait;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message, assigning the next per-conversation id.
    async fn append(&self, message: NewMessage) -> Result<Message>;

    /// All messages of a conversation, ascending by id.
    async fn list_by_conversation(&self, conversation_id: ConversationId) -> Result<Vec<Message>>;

    async fn last_message(&self, conversation_id: ConversationId) -> Result<Option<Message>>;
}

#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    /// All conversations, ascending by id.
    async fn list(&self) -> Result<Vec<ConversationRecord>>;

    async fn create(&self, display_name: &str) -> Result<ConversationRecord>;

    async fn save_read_watermark(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<()>;
}
