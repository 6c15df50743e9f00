//! Conversation list handlers

use crate::config::AppState;
use crate::error::{Error, Result};
use crate::views::{ConversationItem, CreateConversationInput};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chat_sync::ConversationId;
use chrono::Utc;
use tracing::info;

/// GET /api/chats
///
/// Conversations, most recently active first.
pub async fn list_conversations(State(state): State<AppState>) -> Json<Vec<ConversationItem>> {
    info!("GET /api/chats");
    let now = Utc::now();
    let items = state
        .chat
        .list_conversations()
        .into_iter()
        .map(|c| ConversationItem::from_conversation(c, now))
        .collect();
    Json(items)
}

/// POST /api/chats
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(input): Json<CreateConversationInput>,
) -> Result<(StatusCode, Json<ConversationItem>)> {
    info!("POST /api/chats");
    let name = input.name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest("Conversation name must not be empty".to_string()));
    }
    let conversation = state.chat.create_conversation(name).await?;
    Ok((
        StatusCode::CREATED,
        Json(ConversationItem::from_conversation(conversation, Utc::now())),
    ))
}

/// POST /api/chats/{id}/read
pub async fn mark_read(
    Path(conversation_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<ConversationItem>> {
    info!("POST /api/chats/{}/read", conversation_id);
    let conversation = state
        .chat
        .mark_conversation_read(ConversationId(conversation_id))
        .await?;
    Ok(Json(ConversationItem::from_conversation(conversation, Utc::now())))
}
