//! History and submit handlers

use crate::config::AppState;
use crate::error::Result;
use crate::views::SubmitMessageInput;
use axum::{
    extract::{Path, State},
    response::Json,
};
use chat_sync::{ConversationId, Message};
use tracing::{info, warn};

/// GET /api/messages/{chat_id}
///
/// Full history of one conversation, ascending by id.
pub async fn get_messages(
    Path(chat_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Message>>> {
    info!("GET /api/messages/{}", chat_id);
    let history = state.chat.fetch_history(ConversationId(chat_id)).await?;
    Ok(Json(history))
}

/// POST /api/messages
///
/// Stores the message, updates the conversation summary and pushes it to
/// every live connection joined to the conversation.
pub async fn post_message(
    State(state): State<AppState>,
    Json(input): Json<SubmitMessageInput>,
) -> Result<Json<Message>> {
    info!("POST /api/messages (chat {})", input.chat_id);
    let message = state
        .chat
        .submit_message(input.chat_id, &input.content, input.sender)
        .await
        .map_err(|e| {
            warn!("Failed to submit message: {}", e);
            e
        })?;
    Ok(Json(message))
}
