//! Conversation registry
//!
//! Holds the denormalized summary of every conversation (`lastMessage`,
//! `lastActivityAt`, `unreadCount`). `apply_message` is the only writer of
//! those fields during normal operation and must see messages in exact id
//! order; anything else is rejected with `OutOfOrderApply` so the caller can
//! rebuild the summary from the message store with `resync`.

use crate::error::{Result, SyncError};
use crate::models::{Conversation, ConversationId, ConversationRecord, Message, MessageId, Sender};
use crate::store::{ConversationDirectory, MessageStore};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Default)]
pub struct ConversationRegistry {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild every summary from the directory and the message store.
    pub async fn load(
        directory: &dyn ConversationDirectory,
        store: &dyn MessageStore,
    ) -> Result<Self> {
        let registry = Self::new();
        for record in directory.list().await? {
            let messages = store.list_by_conversation(record.id).await?;
            registry.insert(&record, &messages);
        }
        info!(
            "[Registry] Loaded {} conversations",
            registry.conversations.read().len()
        );
        Ok(registry)
    }

    /// Register a conversation with its current history.
    pub fn insert(&self, record: &ConversationRecord, messages: &[Message]) -> Conversation {
        let conversation = Conversation::summarize(record, messages);
        self.conversations
            .write()
            .insert(record.id, conversation.clone());
        conversation
    }

    pub fn contains(&self, conversation_id: ConversationId) -> bool {
        self.conversations.read().contains_key(&conversation_id)
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.conversations.read().get(&conversation_id).cloned()
    }

    pub fn last_activity_at(&self, conversation_id: ConversationId) -> Option<DateTime<Utc>> {
        self.conversations
            .read()
            .get(&conversation_id)
            .map(|c| c.last_activity_at)
    }

    /// Conversations, most recently active first; ties by ascending id.
    pub fn list_ordered_by_activity(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> =
            self.conversations.read().values().cloned().collect();
        conversations.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        conversations
    }

    /// Fold one freshly stored message into its conversation summary.
    pub fn apply_message(&self, message: &Message) -> Result<Conversation> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(&message.conversation_id)
            .ok_or(SyncError::UnknownConversation(message.conversation_id))?;

        let expected = conversation.last_message_id.next();
        if message.id != expected {
            return Err(SyncError::OutOfOrderApply {
                conversation_id: message.conversation_id,
                expected,
                got: message.id,
            });
        }

        conversation.last_message = message.content.clone();
        conversation.last_activity_at = message.created_at;
        conversation.last_message_id = message.id;
        if message.sender == Sender::Counterparty {
            conversation.unread_count += 1;
        }
        Ok(conversation.clone())
    }

    /// Reset the unread count. Returns the new read watermark.
    pub fn mark_read(&self, conversation_id: ConversationId) -> Result<MessageId> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(&conversation_id)
            .ok_or(SyncError::UnknownConversation(conversation_id))?;
        conversation.unread_count = 0;
        conversation.last_read_message_id = conversation.last_message_id;
        Ok(conversation.last_read_message_id)
    }

    /// Recompute one summary from the authoritative history.
    pub fn resync(&self, conversation_id: ConversationId, messages: &[Message]) -> Result<Conversation> {
        let mut conversations = self.conversations.write();
        let current = conversations
            .get_mut(&conversation_id)
            .ok_or(SyncError::UnknownConversation(conversation_id))?;

        let record = ConversationRecord {
            id: current.id,
            display_name: current.display_name.clone(),
            created_at: current.last_activity_at,
            last_read_message_id: current.last_read_message_id,
        };
        let rebuilt = Conversation::summarize(&record, messages);
        if rebuilt != *current {
            warn!(
                conversation_id = %conversation_id,
                last_message_id = %rebuilt.last_message_id,
                "[Registry] Summary diverged from store, rebuilt"
            );
        }
        *current = rebuilt.clone();
        Ok(rebuilt)
    }
}
