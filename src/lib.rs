//! Highrise: recurring crawl job coordination
//!
//! This crate schedules many independent crawl jobs grouped by namespace,
//! keeps each job's request queue bounded in memory with a durable SQLite
//! backlog, and serializes execution of a job across processes with a
//! TTL-based lock stored next to the backlog.

pub mod config;
pub mod execution;
pub mod lock;
pub mod output;
pub mod queue;
pub mod scheduler;
pub mod storage;

use thiserror::Error;

/// Main error type for Highrise operations
#[derive(Debug, Error)]
pub enum HighriseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Lock error: {0}")]
    Lock(#[from] lock::LockError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("Runner error: {0}")]
    Runner(#[from] execution::RunnerError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required field '{field}' in job definition")]
    MissingField { field: &'static str },

    #[error("Invalid job definition path: {0}")]
    InvalidJobPath(String),
}

/// Result type alias for Highrise operations
pub type Result<T> = std::result::Result<T, HighriseError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{JobConfig, Settings};
pub use lock::DistributedLock;
pub use queue::{FetchRequest, RequestQueue};
pub use scheduler::JobScheduler;
pub use storage::{SqliteStorage, Storage};
