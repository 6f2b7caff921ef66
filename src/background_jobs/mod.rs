//! Background job scheduling and execution.
//!
//! Runs the periodic sweeps of the acquisition core: the stale job reaper,
//! indexer reconciliation and cache pruning.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, JobError, JobSchedule};
pub use scheduler::JobScheduler;
