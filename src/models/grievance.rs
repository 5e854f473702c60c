//! Recorded failure events kept for future context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A failure the heartbeat should remember, not a user-facing error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grievance {
    /// Unique record identifier.
    pub id: String,
    /// Where the failure happened (tool name, `preflight`, ...).
    pub source: String,
    /// Human-readable description.
    pub content: String,
    /// Best-effort embedding of `content`.
    pub embedding: Option<Vec<f64>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Grievance {
    /// Construct a grievance with a generated id.
    #[must_use]
    pub fn new(source: &str, content: &str, embedding: Option<Vec<f64>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.to_owned(),
            content: content.to_owned(),
            embedding,
            created_at: Utc::now(),
        }
    }
}
