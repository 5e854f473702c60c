//! Task model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for a delegated task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Stored but not yet picked up.
    Pending,
    /// Currently waiting on the reasoning backend.
    Running,
    /// Finished with a reply.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lower-case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Time-derived unique identifier.
    pub id: String,
    /// Prompt text forwarded to the backend.
    pub content: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Human-readable outcome; the error text for failed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Reply lines accumulated while running.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    /// Creation timestamp.
    pub started_at: DateTime<Utc>,
    /// Set once when the task reaches a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Construct a pending task.
    #[must_use]
    pub fn new(id: String, content: String) -> Self {
        Self {
            id,
            content,
            status: TaskStatus::Pending,
            result: None,
            logs: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Status only moves forward: `pending → running → completed | failed`.
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self.status, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (
                    TaskStatus::Running,
                    TaskStatus::Completed | TaskStatus::Failed
                )
        )
    }

    /// Full reply text assembled from the log lines.
    #[must_use]
    pub fn reply_text(&self) -> String {
        self.logs.join("\n")
    }
}
