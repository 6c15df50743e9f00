//! Simulated counterparty
//!
//! Every tick, each conversation with a live viewer gets a canned reply with
//! the configured probability. Replies go through the normal submit path.

use std::sync::Arc;
use std::time::Duration;

use chat_sync::{ChatService, ConversationId, Message, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const CANNED_REPLIES: [&str; 6] = [
    "That's great to hear!",
    "I understand what you mean.",
    "Let me think about that...",
    "Can you explain more?",
    "I agree with you!",
    "That sounds interesting!",
];

/// One simulation round. `roll` yields a value in `[0, 1)` per conversation.
pub async fn tick(
    chat: &ChatService,
    probability: f64,
    mut roll: impl FnMut() -> f64,
) -> Vec<Message> {
    let mut sent = Vec::new();
    for conversation_id in chat.hub().joined_conversations() {
        if roll() >= probability {
            continue;
        }
        let reply = CANNED_REPLIES[rand::random_range(0..CANNED_REPLIES.len())];
        if let Some(message) = reply_in(chat, conversation_id, reply).await {
            sent.push(message);
        }
    }
    sent
}

async fn reply_in(chat: &ChatService, conversation_id: ConversationId, reply: &str) -> Option<Message> {
    match chat
        .submit_message(conversation_id, reply, Sender::Counterparty)
        .await
    {
        Ok(message) => {
            debug!("Simulated reply {} in chat {}", message.id, conversation_id);
            Some(message)
        }
        Err(e) => {
            warn!("Simulated reply in chat {} failed: {}", conversation_id, e);
            None
        }
    }
}

/// Run `tick` forever on `interval`.
pub fn spawn(chat: Arc<ChatService>, interval: Duration, probability: f64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tick(&chat, probability, rand::random::<f64>).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_sync::MemoryStore;

    #[tokio::test]
    async fn test_tick_only_replies_where_someone_is_watching() {
        let chat = ChatService::open(Arc::new(MemoryStore::new())).await.unwrap();
        let watched = chat.create_conversation("John Doe").await.unwrap().id;
        let idle = chat.create_conversation("Sarah Smith").await.unwrap().id;

        let (connection, mut rx) = chat.connect();
        chat.join_live(connection, watched).unwrap();

        let sent = tick(&chat, 0.3, || 0.0).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].conversation_id, watched);
        assert_eq!(sent[0].sender, Sender::Counterparty);
        assert!(CANNED_REPLIES.contains(&sent[0].content.as_str()));
        assert_eq!(rx.recv().await.unwrap(), sent[0]);

        assert!(chat.fetch_history(idle).await.unwrap().is_empty());
        assert_eq!(chat.get_conversation(watched).unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn test_tick_respects_probability() {
        let chat = ChatService::open(Arc::new(MemoryStore::new())).await.unwrap();
        let id = chat.create_conversation("Mike Johnson").await.unwrap().id;
        let (connection, _rx) = chat.connect();
        chat.join_live(connection, id).unwrap();

        assert!(tick(&chat, 0.3, || 0.5).await.is_empty());
        assert!(tick(&chat, 0.0, || 0.0).await.is_empty());
    }
}
