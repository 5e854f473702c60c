//! Conversation history repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::history::{Conversation, HistoryMessage};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for conversations, their messages, and platform mappings.
#[derive(Clone)]
pub struct HistoryRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    title: String,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn into_conversation(self) -> Result<Conversation> {
        Ok(Conversation {
            id: self.id,
            title: self.title,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    role: String,
    content: String,
    created_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<HistoryMessage> {
        Ok(HistoryMessage {
            id: self.id,
            role: self.role,
            content: self.content,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid timestamp: {e}")))
}

impl HistoryRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a standalone conversation and return its id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create_conversation(&self, title: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO conversation (id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
        )
        .bind(&id)
        .bind(title)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;
        Ok(id)
    }

    /// Resolve the conversation bound to `(platform, chat_id)`, creating
    /// one on first contact.
    ///
    /// Concurrent first contacts may both create a conversation; the
    /// mapping insert is conditional and the winner is re-read, so every
    /// caller ends up with the same id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any query fails.
    pub async fn get_or_create_conversation(&self, platform: &str, chat_id: &str) -> Result<String> {
        if let Some(id) = self.lookup_mapping(platform, chat_id).await? {
            return Ok(id);
        }

        let id = self
            .create_conversation(&format!("{platform} conversation ({chat_id})"))
            .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO platform_mapping (platform, platform_id, conversation_id)
             VALUES (?1, ?2, ?3)",
        )
        .bind(platform)
        .bind(chat_id)
        .bind(&id)
        .execute(self.db.as_ref())
        .await?;

        self.lookup_mapping(platform, chat_id)
            .await?
            .ok_or_else(|| AppError::Db(format!("mapping for {platform}/{chat_id} vanished")))
    }

    async fn lookup_mapping(&self, platform: &str, chat_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT conversation_id FROM platform_mapping
             WHERE platform = ?1 AND platform_id = ?2",
        )
        .bind(platform)
        .bind(chat_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Append a message and bump the conversation's `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn add_message(&self, conversation_id: &str, role: &str, content: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO message (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversation SET updated_at = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The last `limit` messages of a conversation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn recent_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<HistoryMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, role, content, created_at FROM message
             WHERE conversation_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;

        let mut messages = rows
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// All conversations, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            "SELECT id, title, created_at, updated_at FROM conversation
             ORDER BY updated_at DESC",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(ConversationRow::into_conversation).collect()
    }
}
