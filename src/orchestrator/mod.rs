//! Orchestration services.
//!
//! Every service is constructed explicitly in `main` and shared through
//! `Arc`; the three long-lived loops (dispatcher, scheduler, heartbeat)
//! each run on their own task and stop on a shared cancellation token.

pub mod actions;
pub mod delegates;
pub mod dispatcher;
pub mod drives;
pub mod grievances;
pub mod heartbeat;
pub mod missions;
pub mod scheduler;
pub mod task_manager;
