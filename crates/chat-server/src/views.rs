//! Wire shapes for the REST and WebSocket surface

use chat_sync::{Conversation, ConversationId, Message, MessageId, Sender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// One row of `GET /api/chats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationItem {
    pub id: ConversationId,
    pub name: String,
    pub last_message: String,
    pub last_activity_at: DateTime<Utc>,
    pub last_message_id: MessageId,
    pub last_read_message_id: MessageId,
    /// Relative label: "hh:mm AM" today, "Yesterday", else "Mon D"
    pub time: String,
    pub unread: u32,
}

impl ConversationItem {
    pub fn from_conversation(conversation: Conversation, now: DateTime<Utc>) -> Self {
        Self {
            id: conversation.id,
            time: time_label(conversation.last_activity_at, now),
            name: conversation.display_name,
            last_message: conversation.last_message,
            last_activity_at: conversation.last_activity_at,
            last_message_id: conversation.last_message_id,
            last_read_message_id: conversation.last_read_message_id,
            unread: conversation.unread_count,
        }
    }
}

/// Label by whole days elapsed since `at`
pub fn time_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - at).num_milliseconds().div_euclid(MS_PER_DAY);
    match days {
        0 => at.format("%I:%M %p").to_string(),
        1 => "Yesterday".to_string(),
        _ => at.format("%b %-d").to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationInput {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMessageInput {
    pub chat_id: ConversationId,
    pub content: String,
    pub sender: Sender,
}

/// Frames sent by WebSocket clients
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    JoinChat { chat_id: ConversationId },
    #[serde(rename_all = "camelCase")]
    LeaveChat { chat_id: ConversationId },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        chat_id: ConversationId,
        content: String,
        sender: Sender,
    },
}

/// Frames pushed to WebSocket clients
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    NewMessage { message: Message },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_time_label_today() {
        let now = at(2024, 3, 5, 18, 0);
        assert_eq!(time_label(at(2024, 3, 5, 9, 7), now), "09:07 AM");
        assert_eq!(time_label(at(2024, 3, 5, 14, 30), now), "02:30 PM");
    }

    #[test]
    fn test_time_label_yesterday_and_older() {
        let now = at(2024, 3, 5, 18, 0);
        assert_eq!(time_label(at(2024, 3, 4, 12, 0), now), "Yesterday");
        assert_eq!(time_label(at(2024, 2, 28, 12, 0), now), "Feb 28");
    }

    #[test]
    fn test_client_frames_parse() {
        let join: ClientFrame = serde_json::from_str(r#"{"type":"joinChat","chatId":3}"#).unwrap();
        assert_eq!(join, ClientFrame::JoinChat { chat_id: ConversationId(3) });

        let send: ClientFrame = serde_json::from_str(
            r#"{"type":"sendMessage","chatId":1,"content":"hi","sender":"other"}"#,
        )
        .unwrap();
        assert_eq!(
            send,
            ClientFrame::SendMessage {
                chat_id: ConversationId(1),
                content: "hi".to_string(),
                sender: Sender::Counterparty,
            }
        );
    }

    #[test]
    fn test_server_frame_shape() {
        let frame = ServerFrame::Error {
            message: "nope".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, serde_json::json!({"type": "error", "message": "nope"}));
    }
}
