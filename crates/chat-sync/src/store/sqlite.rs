//! SQLite-backed message store and conversation directory
//!
//! Messages are keyed by `(conversation_id, id)`. The per-conversation id is
//! assigned inside a single `INSERT ... SELECT MAX(id) + 1` statement so two
//! writers can never be handed the same id. Timestamps are stored as UTC
//! milliseconds.

use super::{ConversationDirectory, MessageStore};
use crate::error::{Result, SyncError};
use crate::models::{ConversationId, ConversationRecord, Message, MessageId, NewMessage, Sender};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("[Store] SQLite store opened at {:?}", path);
        Ok(store)
    }

    /// Private in-memory database; a single pooled connection keeps it alive.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_read_message_id INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                id INTEGER NOT NULL,
                content TEXT NOT NULL,
                sender TEXT NOT NULL CHECK (sender IN ('user', 'other')),
                created_at INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn conversation_exists(&self, conversation_id: ConversationId) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
            .bind(conversation_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SyncError::StoreUnavailable(format!("invalid timestamp {}", ms)))
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let sender: String = row.try_get("sender")?;
    let sender = Sender::parse(&sender)
        .ok_or_else(|| SyncError::StoreUnavailable(format!("invalid sender {:?}", sender)))?;
    Ok(Message {
        id: MessageId(row.try_get::<i64, _>("id")? as u64),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        content: row.try_get("content")?,
        sender,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: ConversationId(row.try_get("id")?),
        display_name: row.try_get("display_name")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        last_read_message_id: MessageId(row.try_get::<i64, _>("last_read_message_id")? as u64),
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        if !self.conversation_exists(message.conversation_id).await? {
            return Err(SyncError::UnknownConversation(message.conversation_id));
        }

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO messages (conversation_id, id, content, sender, created_at)
            SELECT ?1, COALESCE(MAX(id), 0) + 1, ?2, ?3, ?4
            FROM messages WHERE conversation_id = ?1
            RETURNING id
            "#,
        )
        .bind(message.conversation_id.0)
        .bind(&message.content)
        .bind(message.sender.as_str())
        .bind(message.created_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(Message {
            id: MessageId(id as u64),
            conversation_id: message.conversation_id,
            content: message.content,
            sender: message.sender,
            created_at: message.created_at,
        })
    }

    async fn list_by_conversation(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT conversation_id, id, content, sender, created_at FROM messages \
             WHERE conversation_id = ? ORDER BY id ASC",
        )
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn last_message(&self, conversation_id: ConversationId) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT conversation_id, id, content, sender, created_at FROM messages \
             WHERE conversation_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(conversation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }
}

#[async_trait]
impl ConversationDirectory for SqliteStore {
    async fn list(&self) -> Result<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            "SELECT id, display_name, created_at, last_read_message_id FROM conversations ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn create(&self, display_name: &str) -> Result<ConversationRecord> {
        let created_at = crate::clock::truncate_millis(Utc::now());
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO conversations (display_name, created_at) VALUES (?, ?) RETURNING id",
        )
        .bind(display_name)
        .bind(created_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(ConversationRecord {
            id: ConversationId(id),
            display_name: display_name.to_string(),
            created_at,
            last_read_message_id: MessageId::NONE,
        })
    }

    async fn save_read_watermark(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET last_read_message_id = ? WHERE id = ?")
            .bind(message_id.0 as i64)
            .bind(conversation_id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::UnknownConversation(conversation_id));
        }
        Ok(())
    }
}
