//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Reasoning-backend connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    /// Unix domain socket the backend listens on.
    pub socket_path: PathBuf,
    /// Dial attempts before a call fails with a transport error.
    #[serde(default = "default_dial_attempts")]
    pub dial_attempts: u32,
    /// Pause between dial attempts.
    #[serde(default = "default_dial_backoff_ms")]
    pub dial_backoff_ms: u64,
    /// Upper bound on a single unary request/response exchange.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Upper bound on one delegated task execution.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: u64,
}

impl BackendConfig {
    /// Pause between dial attempts.
    #[must_use]
    pub fn dial_backoff(&self) -> Duration {
        Duration::from_millis(self.dial_backoff_ms)
    }

    /// Upper bound on a single unary exchange.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Upper bound on one task execution.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }
}

fn default_dial_attempts() -> u32 {
    3
}

fn default_dial_backoff_ms() -> u64 {
    500
}

fn default_request_timeout() -> u64 {
    120
}

fn default_task_timeout() -> u64 {
    300
}

/// Priority dispatcher settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DispatcherConfig {
    /// Capacity of each of the three priority queues.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long `enqueue` waits on a full queue before giving up.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Number of prior conversation messages forwarded with each request.
    #[serde(default = "default_context_messages")]
    pub context_messages: u32,
    /// Upper bound on producing one reply.
    #[serde(default = "default_request_timeout")]
    pub reply_timeout_seconds: u64,
    /// Channel used when a direct reply cannot be delivered.
    #[serde(default = "default_fallback_channel")]
    pub fallback_channel: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            context_messages: default_context_messages(),
            reply_timeout_seconds: default_request_timeout(),
            fallback_channel: default_fallback_channel(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

fn default_enqueue_timeout_ms() -> u64 {
    2000
}

fn default_context_messages() -> u32 {
    10
}

fn default_fallback_channel() -> String {
    "outbox".into()
}

/// Heartbeat loop and action gating settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Whether the autonomous loop runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval used when the mission deadline is at risk.
    #[serde(default = "default_short_seconds")]
    pub short_seconds: u64,
    /// Interval used when the deadline is within a day.
    #[serde(default = "default_medium_seconds")]
    pub medium_seconds: u64,
    /// Interval used otherwise, including when no mission is active.
    #[serde(default = "default_long_seconds")]
    pub long_seconds: u64,
    /// Minimum assurance score for read-only tools.
    #[serde(default = "default_read_only_threshold")]
    pub read_only_threshold: f64,
    /// Minimum assurance score for mutating tools.
    #[serde(default = "default_mutating_threshold")]
    pub mutating_threshold: f64,
    /// Curiosity level above which one sub-threshold action is explored.
    #[serde(default = "default_curiosity_set_point")]
    pub curiosity_set_point: f64,
    /// Upper bound on a generated mission script run.
    #[serde(default = "default_script_timeout")]
    pub script_timeout_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            short_seconds: default_short_seconds(),
            medium_seconds: default_medium_seconds(),
            long_seconds: default_long_seconds(),
            read_only_threshold: default_read_only_threshold(),
            mutating_threshold: default_mutating_threshold(),
            curiosity_set_point: default_curiosity_set_point(),
            script_timeout_seconds: default_script_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_short_seconds() -> u64 {
    60
}

fn default_medium_seconds() -> u64 {
    300
}

fn default_long_seconds() -> u64 {
    600
}

fn default_read_only_threshold() -> f64 {
    0.6
}

fn default_mutating_threshold() -> f64 {
    0.9
}

fn default_curiosity_set_point() -> f64 {
    0.8
}

fn default_script_timeout() -> u64 {
    180
}

/// Periodic scheduler settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Ticker granularity.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Cadence of the security audit job.
    #[serde(default = "default_audit_hours")]
    pub audit_interval_hours: u64,
    /// Cadence of the reflection job (extra heartbeat).
    #[serde(default = "default_reflection_hours")]
    pub reflection_interval_hours: u64,
    /// Days before recorded grievances are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            audit_interval_hours: default_audit_hours(),
            reflection_interval_hours: default_reflection_hours(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_audit_hours() -> u64 {
    24
}

fn default_reflection_hours() -> u64 {
    6
}

fn default_retention_days() -> u32 {
    30
}

fn default_ipc_name() -> String {
    "steward".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding JSON snapshots, history database, and delegates.
    pub data_dir: PathBuf,
    /// Project root the heartbeat observes and mission scripts run in.
    pub workspace_root: PathBuf,
    /// Named local socket for `steward-ctl`.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Reasoning backend connection.
    pub backend: BackendConfig,
    /// Priority dispatcher tuning.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Heartbeat tuning.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Scheduler tuning.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Task snapshot file.
    #[must_use]
    pub fn tasks_path(&self) -> PathBuf {
        self.data_dir.join("tasks.json")
    }

    /// Mission snapshot file.
    #[must_use]
    pub fn missions_path(&self) -> PathBuf {
        self.data_dir.join("missions.json")
    }

    /// Scheduler entries file.
    #[must_use]
    pub fn schedule_path(&self) -> PathBuf {
        self.data_dir.join("schedule.json")
    }

    /// Drive state file.
    #[must_use]
    pub fn drives_path(&self) -> PathBuf {
        self.data_dir.join("drives.json")
    }

    /// Conversation history and grievance database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    /// Directory of delegate agent definitions.
    #[must_use]
    pub fn delegates_dir(&self) -> PathBuf {
        self.data_dir.join("delegates")
    }

    /// Append-only file for undeliverable replies.
    #[must_use]
    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir.join("outbox.jsonl")
    }

    fn validate(&mut self) -> Result<()> {
        if self.dispatcher.queue_capacity == 0 {
            return Err(AppError::Config(
                "dispatcher.queue_capacity must be greater than zero".into(),
            ));
        }

        if self.backend.dial_attempts == 0 {
            return Err(AppError::Config(
                "backend.dial_attempts must be greater than zero".into(),
            ));
        }

        if self.scheduler.tick_seconds == 0 {
            return Err(AppError::Config(
                "scheduler.tick_seconds must be greater than zero".into(),
            ));
        }

        let hb = &self.heartbeat;
        if !(hb.short_seconds <= hb.medium_seconds && hb.medium_seconds <= hb.long_seconds) {
            return Err(AppError::Config(
                "heartbeat intervals must satisfy short <= medium <= long".into(),
            ));
        }

        for (name, value) in [
            ("read_only_threshold", hb.read_only_threshold),
            ("mutating_threshold", hb.mutating_threshold),
            ("curiosity_set_point", hb.curiosity_set_point),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Config(format!(
                    "heartbeat.{name} must be within 0.0..=1.0"
                )));
            }
        }

        fs::create_dir_all(&self.data_dir)
            .map_err(|err| AppError::Config(format!("cannot create data_dir: {err}")))?;

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
