//! Error types for message synchronization.

use crate::models::{ConversationId, MessageId};
use thiserror::Error;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while submitting, applying or reconciling messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
    #[error("Message content must not be empty")]
    InvalidContent,

    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Out of order apply in conversation {conversation_id}: expected message {expected}, got {got}")]
    OutOfOrderApply {
        conversation_id: ConversationId,
        expected: MessageId,
        got: MessageId,
    },

    #[error("No conversation is open")]
    NotLive,

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::StoreUnavailable(err.to_string())
    }
}

impl SyncError {
    /// Whether re-issuing an equivalent request can succeed.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::StoreUnavailable(_) | SyncError::Backend(_))
    }
}
