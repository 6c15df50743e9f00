//! Handlers for server
//!
//! REST endpoints for conversations and history, plus the WebSocket live channel.

pub mod conversations;
pub mod live;
pub mod messages;

// Re-export AppState from config
pub use crate::config::AppState;

// Conversation list and read state
pub use conversations::{create_conversation, list_conversations, mark_read};

// History and submit
pub use messages::{get_messages, post_message};

// Live channel
pub use live::ws_handler;

pub async fn health_check() -> &'static str {
    "OK - Chat Server"
}
