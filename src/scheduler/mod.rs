//! Job scheduling
//!
//! This module contains the in-process schedule, the sources it reloads job
//! definitions from, and the daemon loop tying them to storage and runners.

mod daemon;
mod entry;
mod job_scheduler;
mod source;

pub use daemon::Daemon;
pub use entry::ScheduleEntry;
pub use job_scheduler::JobScheduler;
pub use source::{DirectoryJobSource, JobSource, StaticJobSource};

use crate::execution::RunnerError;
use crate::storage::StorageError;
use crate::ConfigError;
use thiserror::Error;

/// Errors that abort a scheduler tick
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No runner registered for engine '{0}'")]
    UnknownEngine(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
