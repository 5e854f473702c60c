//! Inbound message model and priority classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keywords that promote a message to [`Priority::High`].
const HIGH_PRIORITY_KEYWORDS: [&str; 2] = ["urgent", "critical"];

/// Dispatch priority; higher levels are always drained first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Internally generated or background requests.
    Low,
    /// Default for user messages.
    Normal,
    /// Messages flagged as urgent by the sender.
    High,
}

impl Priority {
    /// Classify a message body with the keyword heuristic.
    ///
    /// Presence of `urgent` or `critical` (any case) yields `High`;
    /// everything else is `Normal`.
    #[must_use]
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if HIGH_PRIORITY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            Self::High
        } else {
            Self::Normal
        }
    }

    /// Lower-case name for logs and receipts.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// An inbound request awaiting processing. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Originating channel name (e.g. `ipc`, `telegram`).
    pub platform: String,
    /// Channel-specific conversation identifier.
    pub chat_id: String,
    /// Sender identifier.
    pub from: String,
    /// Message body.
    pub text: String,
    /// Queue the message was routed to.
    pub priority: Priority,
    /// When the message entered the dispatcher.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Build a message, classifying its priority from the text.
    #[must_use]
    pub fn new(platform: &str, chat_id: &str, from: &str, text: &str) -> Self {
        Self::with_priority(platform, chat_id, from, text, Priority::classify(text))
    }

    /// Build a message with an explicit priority.
    #[must_use]
    pub fn with_priority(
        platform: &str,
        chat_id: &str,
        from: &str,
        text: &str,
        priority: Priority,
    ) -> Self {
        Self {
            platform: platform.to_owned(),
            chat_id: chat_id.to_owned(),
            from: from.to_owned(),
            text: text.to_owned(),
            priority,
            enqueued_at: Utc::now(),
        }
    }
}
