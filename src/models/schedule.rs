//! Persisted scheduler entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named interval job; the callback is rebound by id at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ScheduledEntry {
    /// Stable job identifier.
    pub id: String,
    /// Interval between runs, in seconds.
    pub interval_seconds: u64,
    /// Completion time of the most recent run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduledEntry {
    /// Whether `now - last_run >= interval`; never-run entries are due.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run {
            None => true,
            Some(last) => {
                let elapsed = (now - last).num_seconds();
                elapsed >= 0 && elapsed.unsigned_abs() >= self.interval_seconds
            }
        }
    }
}
