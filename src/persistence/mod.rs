//! Persistence layer modules.
//!
//! Operational state (tasks, missions, schedule, drives) is kept in
//! full-rewrite JSON snapshots; conversation history and grievances live
//! in `SQLite`.

pub mod db;
pub mod grievance_repo;
pub mod history_repo;
pub mod schema;
pub mod snapshot;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
