//! Storage module for durable scheduler state
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - The job registry and per-job execution locks
//! - The overflow backlog of fetch requests
//! - Daily per-job statistics

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{init_database, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::JobConfig;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A storage handle shared by the queues and locks of one process
pub type SharedStorage<S> = Arc<Mutex<S>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Wraps a storage backend for sharing
pub fn share<S: Storage>(storage: S) -> SharedStorage<S> {
    Arc::new(Mutex::new(storage))
}

/// Runs `f` with exclusive access to a shared storage handle
///
/// A poisoned mutex means another holder panicked mid-operation; that is
/// reported as a database error rather than propagated as a panic.
pub fn with_storage<S, T>(
    storage: &SharedStorage<S>,
    f: impl FnOnce(&mut S) -> StorageResult<T>,
) -> StorageResult<T> {
    let mut guard = storage
        .lock()
        .map_err(|_| StorageError::Database("storage mutex poisoned".to_string()))?;
    f(&mut guard)
}

/// Represents a job in the registry
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub namespace: String,
    pub name: String,
    pub recurrence_minutes: Option<u32>,
    pub enabled: bool,
    pub use_tor: bool,
    pub items_daily_threshold: u32,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Builds the registry row for a job definition
    ///
    /// `id` and `blocked_until` are owned by the database and left unset.
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            id: 0,
            namespace: config.namespace.clone(),
            name: config.job_name.clone(),
            recurrence_minutes: config.recurrence_minutes,
            enabled: config.enabled,
            use_tor: config.use_tor,
            items_daily_threshold: config.items_daily_threshold,
            blocked_until: None,
        }
    }
}

/// Counters collected during one job run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub items_scraped: u64,
    pub retries: u64,
    pub enqueued_memory: u64,
    pub enqueued_disk: u64,
    pub dequeued_memory: u64,
    pub dequeued_disk: u64,
}

impl RunStats {
    /// Requests admitted so far, from either path
    pub fn enqueued(&self) -> u64 {
        self.enqueued_memory + self.enqueued_disk
    }
}

/// Accumulated statistics of one job on one day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStatsRecord {
    pub job_id: i64,
    pub date: NaiveDate,
    pub number_of_runs: u64,
    pub stats: RunStats,
}

/// An enabled job that scraped fewer items than its daily threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdViolation {
    pub namespace: String,
    pub job: String,
    pub items_scraped: u64,
    pub threshold: u32,
}
