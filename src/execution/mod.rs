//! Job execution
//!
//! The scheduler hands every due job to a [`JobRunner`] registered for the
//! job's engine tag. [`CommandRunner`] spawns a command-line crawl engine;
//! [`ExclusiveRunner`] wraps any runner with the cross-process job lock.

mod exclusive;
mod runner;

pub use exclusive::ExclusiveRunner;
pub use runner::{CommandRunner, DATABASE_ENV, JOB_DATA_ENV, QUEUE_CAPACITY_ENV};

use crate::config::JobConfig;
use crate::lock::LockError;
use thiserror::Error;

/// Errors that can occur while running a job
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn engine process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Job {job} exited with {}", describe_code(.code))]
    ExitStatus { job: String, code: Option<i32> },

    #[error("Engine '{engine}' has no http-proxy configured for use-tor jobs")]
    MissingProxy { engine: String },

    #[error("Failed to encode job data: {0}")]
    JobData(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Per-run switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Route the engine's traffic through the configured proxy
    pub use_tor: bool,

    /// Only drain the job's backlog; do not reseed from start URLs
    pub backlog: bool,
}

impl RunOptions {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            use_tor: config.use_tor,
            backlog: false,
        }
    }
}

/// Capability that executes one job run to completion
pub trait JobRunner {
    /// Runs the job, blocking until it finishes
    fn run(&mut self, job: &JobConfig, options: RunOptions) -> Result<(), RunnerError>;
}
