//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Socket dial, write, or read failure towards the reasoning backend.
    Transport(String),
    /// Malformed envelope, oversized frame, or correlation id mismatch.
    Protocol(String),
    /// The reasoning backend answered with an `error` envelope.
    Backend(String),
    /// An operation exceeded its deadline.
    Timeout(String),
    /// A status change that would move a record backwards.
    InvalidTransition(String),
    /// A dispatcher queue stayed full past the enqueue timeout.
    QueueFull(String),
    /// Channel adapter start, stop, or delivery failure.
    Channel(String),
    /// Generated mission script failed to run or exited non-zero.
    Script(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// A tool path resolved outside the workspace root.
    PathViolation(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the error means the backend could not be reached at all.
    ///
    /// Callers on the user-facing path answer these with the deterministic
    /// fallback synthesizer instead of surfacing the error.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::QueueFull(msg) => write!(f, "queue full: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Script(msg) => write!(f, "script: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
