//! In-memory store, used by tests and the `memory` server backend.

use super::{ConversationDirectory, MessageStore};
use crate::error::{Result, SyncError};
use crate::models::{ConversationId, ConversationRecord, Message, MessageId, NewMessage};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Inner {
    conversations: BTreeMap<ConversationId, ConversationRecord>,
    messages: HashMap<ConversationId, Vec<Message>>,
    next_conversation_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Fault injection: when set every operation fails with `StoreUnavailable`.
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::StoreUnavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(SyncError::UnknownConversation(message.conversation_id));
        }

        let history = inner.messages.entry(message.conversation_id).or_default();
        let id = history.last().map(|m| m.id).unwrap_or(MessageId::NONE).next();
        let stored = Message {
            id,
            conversation_id: message.conversation_id,
            content: message.content,
            sender: message.sender,
            created_at: message.created_at,
        };
        history.push(stored.clone());
        Ok(stored)
    }

    async fn list_by_conversation(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        self.check_available()?;
        let inner = self.inner.lock();
        Ok(inner.messages.get(&conversation_id).cloned().unwrap_or_default())
    }

    async fn last_message(&self, conversation_id: ConversationId) -> Result<Option<Message>> {
        self.check_available()?;
        let inner = self.inner.lock();
        Ok(inner
            .messages
            .get(&conversation_id)
            .and_then(|history| history.last().cloned()))
    }
}

#[async_trait]
impl ConversationDirectory for MemoryStore {
    async fn list(&self) -> Result<Vec<ConversationRecord>> {
        self.check_available()?;
        Ok(self.inner.lock().conversations.values().cloned().collect())
    }

    async fn create(&self, display_name: &str) -> Result<ConversationRecord> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        inner.next_conversation_id += 1;
        let record = ConversationRecord {
            id: ConversationId(inner.next_conversation_id),
            display_name: display_name.to_string(),
            created_at: crate::clock::truncate_millis(Utc::now()),
            last_read_message_id: MessageId::NONE,
        };
        inner.conversations.insert(record.id, record.clone());
        Ok(record)
    }

    async fn save_read_watermark(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let record = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(SyncError::UnknownConversation(conversation_id))?;
        record.last_read_message_id = message_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;

    fn new_message(conversation_id: ConversationId, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            content: content.to_string(),
            sender: Sender::User,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ids_are_per_conversation() {
        let store = MemoryStore::new();
        let a = store.create("John Doe").await.unwrap();
        let b = store.create("Sarah Smith").await.unwrap();

        let a1 = store.append(new_message(a.id, "one")).await.unwrap();
        let a2 = store.append(new_message(a.id, "two")).await.unwrap();
        let b1 = store.append(new_message(b.id, "uno")).await.unwrap();

        assert_eq!(a1.id, MessageId(1));
        assert_eq!(a2.id, MessageId(2));
        assert_eq!(b1.id, MessageId(1));
        assert_eq!(store.last_message(a.id).await.unwrap(), Some(a2));
    }

    #[tokio::test]
    async fn test_append_to_unknown_conversation() {
        let store = MemoryStore::new();
        let err = store
            .append(new_message(ConversationId(42), "hi"))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::UnknownConversation(ConversationId(42)));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = MemoryStore::new();
        let record = store.create("Mike Johnson").await.unwrap();
        store.set_unavailable(true);
        let err = tokio_test::assert_err!(store.append(new_message(record.id, "hi")).await);
        assert!(matches!(err, SyncError::StoreUnavailable(_)));

        store.set_unavailable(false);
        assert!(store.list_by_conversation(record.id).await.unwrap().is_empty());
    }
}
