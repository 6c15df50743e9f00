//! Sync engine
//!
//! Turns a submission into a durable, ordered, broadcast message:
//!
//! 1. validate content and conversation
//! 2. take the conversation's lane (one writer per conversation)
//! 3. stamp `created_at`, never earlier than the previous activity
//! 4. append through the `MessageStore` (assigns the id)
//! 5. fold the message into the `ConversationRegistry`
//! 6. publish it on the `SubscriptionHub`
//!
//! A failed append aborts with no registry update and no publish. Failures
//! after the append are logged; the message stays sent.

use crate::clock::{monotonic_after, Clock, SystemClock};
use crate::error::{Result, SyncError};
use crate::hub::SubscriptionHub;
use crate::models::{ConversationId, Message, NewMessage, Sender};
use crate::registry::ConversationRegistry;
use crate::store::MessageStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct SyncEngine {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConversationRegistry>,
    hub: Arc<SubscriptionHub>,
    clock: Arc<dyn Clock>,
    /// Per-conversation write lanes
    lanes: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConversationRegistry>,
        hub: Arc<SubscriptionHub>,
    ) -> Self {
        Self::with_clock(store, registry, hub, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConversationRegistry>,
        hub: Arc<SubscriptionHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            hub,
            clock,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// The conversation's write lane. Holders exclude submits to that conversation.
    pub(crate) fn lane(&self, conversation_id: ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        self.lanes
            .lock()
            .entry(conversation_id)
            .or_default()
            .clone()
    }

    pub async fn submit(
        &self,
        conversation_id: ConversationId,
        content: &str,
        sender: Sender,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(SyncError::InvalidContent);
        }
        if !self.registry.contains(conversation_id) {
            return Err(SyncError::UnknownConversation(conversation_id));
        }

        let lane = self.lane(conversation_id);
        let _writer = lane.lock().await;

        let previous = self
            .registry
            .last_activity_at(conversation_id)
            .ok_or(SyncError::UnknownConversation(conversation_id))?;
        let created_at = monotonic_after(self.clock.now(), previous);

        let message = self
            .store
            .append(NewMessage {
                conversation_id,
                content: content.to_string(),
                sender,
                created_at,
            })
            .await
            .map_err(|e| {
                error!(conversation_id = %conversation_id, "[Sync] Append failed: {}", e);
                e
            })?;

        match self.registry.apply_message(&message) {
            Ok(_) => {}
            Err(SyncError::OutOfOrderApply { expected, got, .. }) => {
                error!(
                    conversation_id = %conversation_id,
                    %expected,
                    %got,
                    "[Sync] Registry out of order, resyncing from store"
                );
                self.resync(conversation_id).await;
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, "[Sync] Registry update failed: {}", e);
            }
        }

        let delivered = self.hub.publish(conversation_id, &message);
        debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            delivered,
            "[Sync] Published"
        );

        info!(
            "Stored message {} in conversation {} ({})",
            message.id,
            conversation_id,
            sender.as_str()
        );
        Ok(message)
    }

    /// Rebuild one conversation summary from the store.
    pub async fn resync(&self, conversation_id: ConversationId) {
        match self.store.list_by_conversation(conversation_id).await {
            Ok(history) => {
                if let Err(e) = self.registry.resync(conversation_id, &history) {
                    error!(conversation_id = %conversation_id, "[Sync] Resync failed: {}", e);
                }
            }
            Err(e) => {
                error!(
                    conversation_id = %conversation_id,
                    "[Sync] Resync could not read history: {}", e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationRecord, MessageId};
    use crate::store::{ConversationDirectory, MemoryStore};
    use chrono::{DateTime, Utc};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<ConversationRegistry>,
        hub: Arc<SubscriptionHub>,
        engine: Arc<SyncEngine>,
        conversation: ConversationRecord,
    }

    async fn fixture_with_clock(clock: Arc<dyn Clock>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let conversation = store.create("John Doe").await.unwrap();
        let registry = Arc::new(ConversationRegistry::new());
        registry.insert(&conversation, &[]);
        let hub = Arc::new(SubscriptionHub::new());
        let engine = Arc::new(SyncEngine::with_clock(
            store.clone(),
            registry.clone(),
            hub.clone(),
            clock,
        ));
        Fixture {
            store,
            registry,
            hub,
            engine,
            conversation,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_clock(Arc::new(SystemClock)).await
    }

    #[tokio::test]
    async fn test_submit_updates_registry_and_publishes() {
        let f = fixture().await;
        let (connection, mut rx) = f.hub.connect();
        f.hub.join(connection, f.conversation.id);

        let hi = f.engine.submit(f.conversation.id, "hi", Sender::User).await.unwrap();
        let hello = f
            .engine
            .submit(f.conversation.id, "hello", Sender::Counterparty)
            .await
            .unwrap();

        assert_eq!(hi.id, MessageId(1));
        assert_eq!(hello.id, MessageId(2));

        let summary = f.registry.get(f.conversation.id).unwrap();
        assert_eq!(summary.last_message, "hello");
        assert_eq!(summary.last_activity_at, hello.created_at);
        assert_eq!(summary.unread_count, 1);

        assert_eq!(rx.recv().await.unwrap(), hi);
        assert_eq!(rx.recv().await.unwrap(), hello);
    }

    #[tokio::test]
    async fn test_blank_content_rejected() {
        let f = fixture().await;
        let err = f
            .engine
            .submit(f.conversation.id, "   \n\t", Sender::User)
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::InvalidContent);
        assert!(f.store.list_by_conversation(f.conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_conversation_rejected() {
        let f = fixture().await;
        let err = f
            .engine
            .submit(ConversationId(999), "hi", Sender::User)
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::UnknownConversation(ConversationId(999)));
    }

    #[tokio::test]
    async fn test_store_failure_leaves_no_trace() {
        let f = fixture().await;
        let (connection, mut rx) = f.hub.connect();
        f.hub.join(connection, f.conversation.id);
        let before = f.registry.get(f.conversation.id).unwrap();

        f.store.set_unavailable(true);
        let err = f
            .engine
            .submit(f.conversation.id, "lost", Sender::Counterparty)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
        assert_eq!(f.registry.get(f.conversation.id).unwrap(), before);
        assert!(rx.try_recv().is_err());

        f.store.set_unavailable(false);
        let retried = f
            .engine
            .submit(f.conversation.id, "lost", Sender::Counterparty)
            .await
            .unwrap();
        assert_eq!(retried.id, MessageId(1));
    }

    #[tokio::test]
    async fn test_clock_going_backwards_is_clamped() {
        let past = DateTime::from_timestamp_millis(1_000).unwrap();
        let f = fixture_with_clock(Arc::new(FixedClock(past))).await;
        let created = f.conversation.created_at;
        assert!(created > past);

        let first = f.engine.submit(f.conversation.id, "a", Sender::User).await.unwrap();
        let second = f.engine.submit(f.conversation.id, "b", Sender::User).await.unwrap();
        assert_eq!(first.created_at, created + chrono::Duration::milliseconds(1));
        assert_eq!(second.created_at, created + chrono::Duration::milliseconds(2));
    }

    #[tokio::test]
    async fn test_stale_registry_is_resynced_after_append() {
        let f = fixture().await;
        f.engine.submit(f.conversation.id, "one", Sender::User).await.unwrap();

        // A message written behind the engine's back leaves the registry one id short.
        f.store
            .append(NewMessage {
                conversation_id: f.conversation.id,
                content: "two".to_string(),
                sender: Sender::Counterparty,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let third = f
            .engine
            .submit(f.conversation.id, "three", Sender::Counterparty)
            .await
            .unwrap();
        assert_eq!(third.id, MessageId(3));

        let summary = f.registry.get(f.conversation.id).unwrap();
        assert_eq!(summary.last_message_id, MessageId(3));
        assert_eq!(summary.last_message, "three");
        assert_eq!(summary.unread_count, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submits_get_distinct_ids() {
        let f = fixture().await;
        let mut handles = Vec::new();
        for i in 0..20 {
            let engine = f.engine.clone();
            let id = f.conversation.id;
            handles.push(tokio::spawn(async move {
                engine.submit(id, &format!("msg {}", i), Sender::User).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id.0);
        }
        ids.sort();
        assert_eq!(ids, (1..=20).collect::<Vec<u64>>());

        let history = f.store.list_by_conversation(f.conversation.id).await.unwrap();
        for pair in history.windows(2) {
            assert_eq!(pair[1].id, pair[0].id.next());
            assert!(pair[1].created_at >= pair[0].created_at);
        }
        let summary = f.registry.get(f.conversation.id).unwrap();
        assert_eq!(summary.last_message_id, MessageId(20));
        assert_eq!(summary.last_message, history.last().unwrap().content);
    }
}
