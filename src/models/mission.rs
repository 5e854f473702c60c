//! Mission model: a deadline-bound goal pursued by the heartbeat.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for a mission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    /// Being pursued.
    Active,
    /// Closing sequence succeeded.
    Completed,
    /// Given up after failure.
    Failed,
    /// Dropped by the operator.
    Abandoned,
}

/// Status of one mission sub-task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
    /// Abandoned or errored.
    Failed,
}

impl SubTaskStatus {
    /// Parse the loose status strings the backend produces.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "pending" | "todo" => Some(Self::Pending),
            "in_progress" | "running" | "active" => Some(Self::InProgress),
            "completed" | "done" => Some(Self::Completed),
            "failed" | "blocked" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A step the backend proposed towards the mission goal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SubTask {
    /// Identifier unique within the mission.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Current status.
    pub status: SubTaskStatus,
    /// Ids of sub-tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Outcome note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A goal with a deadline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Mission {
    /// Time-derived identifier (`YYYYMMDD-HHMMSS`).
    pub id: String,
    /// Short title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// What "done" means.
    pub goal: String,
    /// Hard deadline.
    pub deadline: DateTime<Utc>,
    /// Current status.
    pub status: MissionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Progress in `0.0..=1.0`, updated by the heartbeat.
    #[serde(default)]
    pub progress: f64,
    /// Backend estimate of remaining work, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_ttc_seconds: Option<i64>,
    /// Proposed steps.
    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,
}

impl Mission {
    /// Construct an active mission.
    #[must_use]
    pub fn new(
        id: String,
        title: String,
        description: String,
        goal: String,
        deadline: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            description,
            goal,
            deadline,
            status: MissionStatus::Active,
            created_at: now,
            updated_at: now,
            progress: 0.0,
            estimated_ttc_seconds: None,
            sub_tasks: Vec::new(),
        }
    }

    /// Time left until the deadline; negative once overdue.
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.deadline - now
    }

    /// Backend estimate of remaining work.
    #[must_use]
    pub fn estimated_ttc(&self) -> Option<Duration> {
        self.estimated_ttc_seconds.and_then(Duration::try_seconds)
    }

    /// Whether the closing sequence should run.
    #[must_use]
    pub fn is_ready_to_close(&self) -> bool {
        self.status == MissionStatus::Active && self.progress >= 1.0
    }
}

/// A mission the backend extracted from free text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionSuggestion {
    /// Proposed title.
    pub title: String,
    /// Proposed goal.
    pub goal: String,
    /// Explicit or estimated deadline.
    pub deadline: DateTime<Utc>,
    /// Why the text reads as a mission.
    #[serde(default)]
    pub reason: String,
}

/// Parse a human duration such as `2h45m`, `90m`, `1d`, or `3600` (seconds).
///
/// Returns `None` for malformed input and for totals outside the range
/// `chrono::Duration` can hold.
#[must_use]
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return Duration::try_seconds(secs);
    }

    let mut total = 0i64;
    let mut digits = String::new();
    for ch in raw.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: i64 = digits.parse().ok()?;
        digits.clear();
        let unit = match ch {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = value.checked_mul(unit).and_then(|part| total.checked_add(part))?;
    }
    if !digits.is_empty() {
        return None;
    }
    Duration::try_seconds(total)
}
