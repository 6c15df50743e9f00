//! chat-sync: message synchronization core for one-to-one chat.
//!
//! - **store**: durable, per-conversation ordered message storage (memory, SQLite).
//! - **registry**: conversation summaries (last message, activity, unread).
//! - **engine**: the submit path: append, summarize, fan out.
//! - **hub**: live routing of new messages to joined connections.
//! - **reconciler**: client-side view merging history, live events and optimistic sends.

pub mod clock;
pub mod engine;
pub mod error;
pub mod hub;
pub mod models;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod store;

// Top-level re-exports for common usage
pub use crate::clock::{Clock, SystemClock};
pub use crate::engine::SyncEngine;
pub use crate::error::{Result, SyncError};
pub use crate::hub::{ConnectionId, LiveReceiver, SubscriptionHub, LIVE_QUEUE_CAPACITY};
pub use crate::models::{
    Conversation, ConversationId, ConversationRecord, Message, MessageId, NewMessage, Sender,
};
pub use crate::reconciler::{ChatBackend, ClientSession, ConversationView, LocalBackend};
pub use crate::registry::ConversationRegistry;
pub use crate::service::ChatService;
pub use crate::store::{ConversationDirectory, MemoryStore, MessageStore, SqliteStore};
