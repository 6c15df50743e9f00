//! Application-facing chat service
//!
//! Bundles the stores, registry, hub and engine behind the operations the
//! surrounding application calls: submit, fetch history, live join/leave,
//! mark read and list conversations.

use crate::clock::{Clock, SystemClock};
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::hub::{ConnectionId, LiveReceiver, SubscriptionHub};
use crate::models::{Conversation, ConversationId, Message, Sender};
use crate::registry::ConversationRegistry;
use crate::store::{ConversationDirectory, MessageStore};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ChatService {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn ConversationDirectory>,
    registry: Arc<ConversationRegistry>,
    hub: Arc<SubscriptionHub>,
    engine: SyncEngine,
}

impl ChatService {
    /// Build the service over a backend that is both message store and directory.
    pub async fn open<S>(backend: Arc<S>) -> Result<Self>
    where
        S: MessageStore + ConversationDirectory + 'static,
    {
        Self::with_clock(backend.clone(), backend, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ConversationDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let registry = Arc::new(ConversationRegistry::load(directory.as_ref(), store.as_ref()).await?);
        let hub = Arc::new(SubscriptionHub::new());
        let engine = SyncEngine::with_clock(store.clone(), registry.clone(), hub.clone(), clock);
        Ok(Self {
            store,
            directory,
            registry,
            hub,
            engine,
        })
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    /// Seed/admin path: create a conversation and register its empty summary.
    pub async fn create_conversation(&self, display_name: &str) -> Result<Conversation> {
        let record = self.directory.create(display_name).await?;
        let conversation = self.registry.insert(&record, &[]);
        info!("Created conversation {} ({})", record.id, display_name);
        Ok(conversation)
    }

    pub async fn submit_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        sender: Sender,
    ) -> Result<Message> {
        self.engine.submit(conversation_id, content, sender).await
    }

    pub async fn fetch_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        if !self.registry.contains(conversation_id) {
            return Err(SyncError::UnknownConversation(conversation_id));
        }
        self.store.list_by_conversation(conversation_id).await
    }

    pub fn connect(&self) -> (ConnectionId, LiveReceiver) {
        self.hub.connect()
    }

    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.hub.disconnect(connection_id);
    }

    pub fn join_live(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> Result<()> {
        if !self.registry.contains(conversation_id) {
            return Err(SyncError::UnknownConversation(conversation_id));
        }
        if !self.hub.join(connection_id, conversation_id) {
            return Err(SyncError::Backend(format!(
                "connection {} is not registered",
                connection_id
            )));
        }
        Ok(())
    }

    pub fn leave_live(&self, connection_id: ConnectionId, conversation_id: ConversationId) {
        self.hub.leave(connection_id, conversation_id);
    }

    /// Persist the read watermark, then reset the unread count.
    ///
    /// Runs on the conversation's write lane, so the watermark is the last
    /// message id at that moment and concurrent mark-reads save in order.
    pub async fn mark_conversation_read(&self, conversation_id: ConversationId) -> Result<Conversation> {
        let lane = self.engine.lane(conversation_id);
        let _writer = lane.lock().await;

        let watermark = self
            .registry
            .get(conversation_id)
            .ok_or(SyncError::UnknownConversation(conversation_id))?
            .last_message_id;
        if let Err(e) = self
            .directory
            .save_read_watermark(conversation_id, watermark)
            .await
        {
            warn!(
                conversation_id = %conversation_id,
                "Failed to persist read watermark: {}", e
            );
            return Err(e);
        }

        self.registry.mark_read(conversation_id)?;
        self.registry
            .get(conversation_id)
            .ok_or(SyncError::UnknownConversation(conversation_id))
    }

    pub fn list_conversations(&self) -> Vec<Conversation> {
        self.registry.list_ordered_by_activity()
    }

    pub fn get_conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.registry.get(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_first_conversation_scenario() {
        let service = ChatService::open(Arc::new(MemoryStore::new())).await.unwrap();
        let c = service.create_conversation("John Doe").await.unwrap();

        let hi = service.submit_message(c.id, "hi", Sender::User).await.unwrap();
        let hello = service
            .submit_message(c.id, "hello", Sender::Counterparty)
            .await
            .unwrap();
        assert_eq!(hi.id, MessageId(1));
        assert_eq!(hello.id, MessageId(2));

        let listed = service.list_conversations();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].last_message, "hello");
        assert_eq!(listed[0].unread_count, 1);

        let read = service.mark_conversation_read(c.id).await.unwrap();
        assert_eq!(read.unread_count, 0);
        assert_eq!(read.last_read_message_id, MessageId(2));
    }

    #[tokio::test]
    async fn test_failed_mark_read_keeps_unread_count() {
        let store = Arc::new(MemoryStore::new());
        let service = ChatService::open(store.clone()).await.unwrap();
        let c = service.create_conversation("John Doe").await.unwrap();
        service.submit_message(c.id, "one", Sender::Counterparty).await.unwrap();
        service.submit_message(c.id, "two", Sender::Counterparty).await.unwrap();

        store.set_unavailable(true);
        let err = service.mark_conversation_read(c.id).await.unwrap_err();
        assert!(err.is_retryable());

        let current = service.get_conversation(c.id).unwrap();
        assert_eq!(current.unread_count, 2);
        assert_eq!(current.last_read_message_id, MessageId::NONE);

        // The store agrees with memory
        store.set_unavailable(false);
        let rebuilt = ConversationRegistry::load(store.as_ref(), store.as_ref())
            .await
            .unwrap();
        assert_eq!(rebuilt.get(c.id).unwrap().unread_count, 2);

        let read = service.mark_conversation_read(c.id).await.unwrap();
        assert_eq!(read.unread_count, 0);
        let rebuilt = ConversationRegistry::load(store.as_ref(), store.as_ref())
            .await
            .unwrap();
        assert_eq!(rebuilt.get(c.id).unwrap().unread_count, 0);
        assert_eq!(rebuilt.get(c.id).unwrap().last_read_message_id, MessageId(2));
    }

    #[tokio::test]
    async fn test_fetch_history_is_repeatable() {
        let service = ChatService::open(Arc::new(MemoryStore::new())).await.unwrap();
        let c = service.create_conversation("Sarah Smith").await.unwrap();
        service.submit_message(c.id, "a", Sender::User).await.unwrap();
        service.submit_message(c.id, "b", Sender::Counterparty).await.unwrap();

        let first = service.fetch_history(c.id).await.unwrap();
        let second = service.fetch_history(c.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_join_live_unknown_conversation() {
        let service = ChatService::open(Arc::new(MemoryStore::new())).await.unwrap();
        let (connection, _rx) = service.connect();
        let err = service.join_live(connection, ConversationId(4)).unwrap_err();
        assert_eq!(err, SyncError::UnknownConversation(ConversationId(4)));
        assert!(service.fetch_history(ConversationId(4)).await.is_err());
    }

    #[tokio::test]
    async fn test_list_orders_by_latest_activity() {
        let service = ChatService::open(Arc::new(MemoryStore::new())).await.unwrap();
        let a = service.create_conversation("A").await.unwrap();
        let b = service.create_conversation("B").await.unwrap();
        service.submit_message(a.id, "first", Sender::User).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        service.submit_message(b.id, "second", Sender::User).await.unwrap();

        let order: Vec<ConversationId> =
            service.list_conversations().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![b.id, a.id]);
    }
}
