//! Domain model module declarations.

pub mod delegate;
pub mod drive;
pub mod grievance;
pub mod history;
pub mod message;
pub mod mission;
pub mod schedule;
pub mod task;
