#![forbid(unsafe_code)]

//! Orchestration core of the `steward` personal agent daemon.
//!
//! Inbound messages flow from channels through the priority dispatcher to
//! the reasoning backend; delegated work is tracked by the task manager;
//! the scheduler and heartbeat run their own timers against the same
//! services.

pub mod channels;
pub mod config;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod rpc;
pub mod tools;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
