//! Live subscription routing
//!
//! Each live connection owns a bounded channel. Connections join and
//! leave conversations; `publish` delivers a message to exactly the
//! connections joined to its conversation, in call order. Nothing here is
//! durable: a connection that was not joined when a message was published
//! never sees it and is expected to re-fetch history.
//!
//! A connection whose queue is full is dropped. Its receiver drains what
//! was queued and then ends; the client reconnects and re-fetches.

use crate::models::{ConversationId, Message};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages a connection may have queued before it is dropped.
pub const LIVE_QUEUE_CAPACITY: usize = 256;

pub type LiveReceiver = mpsc::Receiver<Message>;

struct Connection {
    tx: mpsc::Sender<Message>,
    joined: HashSet<ConversationId>,
}

#[derive(Default)]
struct Routes {
    connections: HashMap<ConnectionId, Connection>,
    by_conversation: HashMap<ConversationId, HashSet<ConnectionId>>,
}

impl Routes {
    fn unroute(&mut self, connection_id: ConnectionId, conversation_id: ConversationId) {
        if let Some(members) = self.by_conversation.get_mut(&conversation_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.by_conversation.remove(&conversation_id);
            }
        }
    }

    fn drop_connection(&mut self, connection_id: ConnectionId) -> bool {
        let Some(connection) = self.connections.remove(&connection_id) else {
            return false;
        };
        for conversation_id in connection.joined {
            self.unroute(connection_id, conversation_id);
        }
        true
    }
}

pub struct SubscriptionHub {
    routes: Mutex<Routes>,
    capacity: usize,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::with_capacity(LIVE_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            routes: Mutex::new(Routes::default()),
            capacity: capacity.max(1),
        }
    }

    /// Register a live connection. Messages for joined conversations arrive on the receiver.
    pub fn connect(&self) -> (ConnectionId, LiveReceiver) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let connection_id = ConnectionId::new();
        self.routes.lock().connections.insert(
            connection_id,
            Connection {
                tx,
                joined: HashSet::new(),
            },
        );
        debug!(connection_id = %connection_id, "[Hub] Connection registered");
        (connection_id, rx)
    }

    /// Remove a connection and every routing entry it holds.
    pub fn disconnect(&self, connection_id: ConnectionId) -> bool {
        let removed = self.routes.lock().drop_connection(connection_id);
        if removed {
            debug!(connection_id = %connection_id, "[Hub] Connection removed");
        }
        removed
    }

    /// Returns false when the connection is not registered.
    pub fn join(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> bool {
        let mut routes = self.routes.lock();
        let Some(connection) = routes.connections.get_mut(&connection_id) else {
            return false;
        };
        connection.joined.insert(conversation_id);
        routes
            .by_conversation
            .entry(conversation_id)
            .or_default()
            .insert(connection_id);
        true
    }

    /// Returns whether the connection was joined.
    pub fn leave(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> bool {
        let mut routes = self.routes.lock();
        let was_joined = routes
            .connections
            .get_mut(&connection_id)
            .is_some_and(|c| c.joined.remove(&conversation_id));
        routes.unroute(connection_id, conversation_id);
        was_joined
    }

    /// Deliver to every connection joined to the conversation. Returns the delivery count.
    pub fn publish(&self, conversation_id: ConversationId, message: &Message) -> usize {
        let mut routes = self.routes.lock();
        let Some(members) = routes.by_conversation.get(&conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for connection_id in members {
            let Some(connection) = routes.connections.get(connection_id) else {
                continue;
            };
            match connection.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %connection_id, "[Hub] Live queue full, dropping connection");
                    dead.push(*connection_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection_id = %connection_id, "[Hub] Pruning closed connection");
                    dead.push(*connection_id);
                }
            }
        }

        for connection_id in dead {
            routes.drop_connection(connection_id);
        }
        delivered
    }

    pub fn subscriber_count(&self, conversation_id: ConversationId) -> usize {
        self.routes
            .lock()
            .by_conversation
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        self.routes.lock().connections.len()
    }

    /// Conversations with at least one joined connection.
    pub fn joined_conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> =
            self.routes.lock().by_conversation.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, Sender};
    use chrono::Utc;

    fn message(conversation: i64, id: u64) -> Message {
        Message {
            id: MessageId(id),
            conversation_id: ConversationId(conversation),
            content: format!("m{}", id),
            sender: Sender::User,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_only_joined_connections() {
        let hub = SubscriptionHub::new();
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        assert!(hub.join(a, ConversationId(1)));
        assert!(hub.join(b, ConversationId(2)));

        assert_eq!(hub.publish(ConversationId(1), &message(1, 1)), 1);

        assert_eq!(rx_a.recv().await.unwrap().id, MessageId(1));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delivery_order_preserved() {
        let hub = SubscriptionHub::new();
        let (a, mut rx) = hub.connect();
        hub.join(a, ConversationId(1));
        for id in 1..=5 {
            hub.publish(ConversationId(1), &message(1, id));
        }
        for id in 1..=5 {
            assert_eq!(rx.recv().await.unwrap().id, MessageId(id));
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = SubscriptionHub::new();
        assert_eq!(hub.publish(ConversationId(9), &message(9, 1)), 0);
    }

    #[test]
    fn test_leave_and_disconnect_clear_routes() {
        let hub = SubscriptionHub::new();
        let (a, _rx) = hub.connect();
        hub.join(a, ConversationId(1));
        hub.join(a, ConversationId(2));
        assert!(hub.leave(a, ConversationId(1)));
        assert!(!hub.leave(a, ConversationId(1)));
        assert_eq!(hub.subscriber_count(ConversationId(1)), 0);
        assert_eq!(hub.joined_conversations(), vec![ConversationId(2)]);

        assert!(hub.disconnect(a));
        assert!(hub.joined_conversations().is_empty());
        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.join(a, ConversationId(1)));
    }

    #[test]
    fn test_dropped_receiver_is_pruned_on_publish() {
        let hub = SubscriptionHub::new();
        let (a, rx) = hub.connect();
        hub.join(a, ConversationId(1));
        drop(rx);

        assert_eq!(hub.publish(ConversationId(1), &message(1, 1)), 0);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.subscriber_count(ConversationId(1)), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_connection() {
        let hub = SubscriptionHub::with_capacity(2);
        let (slow, mut slow_rx) = hub.connect();
        let (fast, mut fast_rx) = hub.connect();
        hub.join(slow, ConversationId(1));
        hub.join(fast, ConversationId(1));

        assert_eq!(hub.publish(ConversationId(1), &message(1, 1)), 2);
        assert_eq!(fast_rx.recv().await.unwrap().id, MessageId(1));
        assert_eq!(hub.publish(ConversationId(1), &message(1, 2)), 2);
        assert_eq!(fast_rx.recv().await.unwrap().id, MessageId(2));

        // The slow reader has two queued; the third overflows it.
        assert_eq!(hub.publish(ConversationId(1), &message(1, 3)), 1);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.subscriber_count(ConversationId(1)), 1);
        assert_eq!(fast_rx.recv().await.unwrap().id, MessageId(3));

        // What was queued still drains, then the stream ends.
        assert_eq!(slow_rx.recv().await.unwrap().id, MessageId(1));
        assert_eq!(slow_rx.recv().await.unwrap().id, MessageId(2));
        assert!(slow_rx.recv().await.is_none());
        assert!(!hub.join(slow, ConversationId(1)));
    }
}
