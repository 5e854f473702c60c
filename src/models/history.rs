//! Conversation history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A thread of messages, mapped from one `(platform, chat_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// UUID.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest message.
    pub updated_at: DateTime<Utc>,
}

/// One stored message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryMessage {
    /// Row identifier.
    pub id: i64,
    /// `user` or `assistant`.
    pub role: String,
    /// Message body.
    pub content: String,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}

/// Where a channel reply should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRoute {
    /// Channel name.
    pub platform: String,
    /// Channel-specific recipient.
    pub chat_id: String,
}

/// Link from a task back to the conversation that requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRef {
    /// Conversation receiving the final reply.
    pub conversation_id: String,
    /// Optional channel route for delivering the final reply.
    pub reply_to: Option<ReplyRoute>,
}
