//! Persisted drive levels and the narrative of recent thoughts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::drive::{Drive, CURIOSITY};
use crate::persistence::snapshot::JsonSnapshot;
use crate::Result;

/// Narrative entries kept; older ones are dropped first.
pub const NARRATIVE_CAPACITY: usize = 100;

/// One timestamped line of the narrative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thought {
    /// When the thought was recorded.
    pub at: DateTime<Utc>,
    /// Free text.
    pub text: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DriveFile {
    #[serde(default)]
    drives: BTreeMap<String, Drive>,
    #[serde(default)]
    narrative: Vec<Thought>,
}

fn default_drives() -> [Drive; 5] {
    [
        Drive::new(CURIOSITY, 0.5, "Appetite for trying low-confidence actions"),
        Drive::new("self_preservation", 0.5, "Preference for safe, reversible moves"),
        Drive::new("autonomy", 0.5, "Willingness to act without being asked"),
        Drive::new("validation", 0.5, "Desire for operator acknowledgement"),
        Drive::new("selfishness", 0.2, "Weight given to own goals over requests"),
    ]
}

/// Drive levels plus narrative, persisted to `drives.json`.
pub struct DriveState {
    snapshot: JsonSnapshot,
    inner: RwLock<DriveFile>,
}

impl DriveState {
    /// Load state from `path`, seeding any missing default drives.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but is unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot = JsonSnapshot::new(path);
        let mut file: DriveFile = snapshot.load()?;
        for drive in default_drives() {
            file.drives.entry(drive.name.clone()).or_insert(drive);
        }
        Ok(Self {
            snapshot,
            inner: RwLock::new(file),
        })
    }

    /// Current level of `name`; unknown drives read as `0.0`.
    pub async fn value(&self, name: &str) -> f64 {
        self.inner
            .read()
            .await
            .drives
            .get(name)
            .map_or(0.0, |drive| drive.value)
    }

    /// Set `name` to `value` (clamped) and persist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the snapshot cannot be written.
    pub async fn set(&self, name: &str, value: f64) -> Result<f64> {
        let mut inner = self.inner.write().await;
        let drive = inner
            .drives
            .entry(name.to_owned())
            .or_insert_with(|| Drive::new(name, 0.0, ""));
        drive.value = value.clamp(0.0, 1.0);
        let updated = drive.value;
        self.snapshot.save(&*inner)?;
        debug!(drive = name, value = updated, "drive set");
        Ok(updated)
    }

    /// Shift `name` by `delta` (clamped) and persist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the snapshot cannot be written.
    pub async fn adjust(&self, name: &str, delta: f64) -> Result<f64> {
        let mut inner = self.inner.write().await;
        let drive = inner
            .drives
            .entry(name.to_owned())
            .or_insert_with(|| Drive::new(name, 0.0, ""));
        drive.value = (drive.value + delta).clamp(0.0, 1.0);
        let updated = drive.value;
        self.snapshot.save(&*inner)?;
        debug!(drive = name, delta, value = updated, "drive adjusted");
        Ok(updated)
    }

    /// Append to the narrative, dropping the oldest entries past capacity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the snapshot cannot be written.
    pub async fn record_thought(&self, text: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.narrative.push(Thought {
            at: Utc::now(),
            text: text.to_owned(),
        });
        let overflow = inner.narrative.len().saturating_sub(NARRATIVE_CAPACITY);
        inner.narrative.drain(..overflow);
        self.snapshot.save(&*inner)
    }

    /// The newest `limit` thoughts, oldest first.
    pub async fn recent_thoughts(&self, limit: usize) -> Vec<Thought> {
        let inner = self.inner.read().await;
        let skip = inner.narrative.len().saturating_sub(limit);
        inner.narrative[skip..].to_vec()
    }

    /// All drives keyed by name.
    pub async fn drives(&self) -> BTreeMap<String, Drive> {
        self.inner.read().await.drives.clone()
    }

    /// One-line `name=value` summary for prompts and status output.
    pub async fn summary(&self) -> String {
        self.inner
            .read()
            .await
            .drives
            .values()
            .map(|drive| format!("{}={:.2}", drive.name, drive.value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
