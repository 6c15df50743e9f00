//! Sample conversations for a fresh install

use chat_sync::{ChatService, Result, Sender};
use tracing::info;

const SAMPLE_NAMES: [&str; 3] = ["John Doe", "Sarah Smith", "Mike Johnson"];

const SAMPLE_THREAD: [(Sender, &str); 3] = [
    (Sender::Counterparty, "Hello! How are you doing today?"),
    (Sender::User, "I'm doing great! Just working on some new projects."),
    (
        Sender::Counterparty,
        "That sounds interesting. Can you tell me more about it?",
    ),
];

/// Seed sample conversations when none exist. Returns whether anything was written.
///
/// Messages go through the regular submit path so ids, summaries and
/// timestamps come out exactly as for live traffic.
pub async fn seed_sample_data(chat: &ChatService) -> Result<bool> {
    if !chat.list_conversations().is_empty() {
        return Ok(false);
    }

    for name in SAMPLE_NAMES {
        let conversation = chat.create_conversation(name).await?;
        for (sender, content) in SAMPLE_THREAD {
            chat.submit_message(conversation.id, content, sender).await?;
        }
    }
    info!("Seeded {} sample conversations", SAMPLE_NAMES.len());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_sync::{MemoryStore, MessageId};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_seed_only_into_empty_directory() {
        let chat = ChatService::open(Arc::new(MemoryStore::new())).await.unwrap();
        assert!(tokio_test::assert_ok!(seed_sample_data(&chat).await));
        assert!(!tokio_test::assert_ok!(seed_sample_data(&chat).await));

        let conversations = chat.list_conversations();
        assert_eq!(conversations.len(), 3);
        for conversation in &conversations {
            assert_eq!(conversation.last_message_id, MessageId(3));
            assert_eq!(conversation.unread_count, 2);
            assert_eq!(
                conversation.last_message,
                "That sounds interesting. Can you tell me more about it?"
            );
        }
    }
}
