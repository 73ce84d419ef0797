//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::config::JobKey;
use crate::queue::FetchRequest;
use crate::storage::{DailyStatsRecord, JobRecord, RunStats, ThresholdViolation};
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {namespace}/{job}")]
    JobNotFound { namespace: String, job: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every operation is a synchronous call against the durable store.
/// Operations that read and then modify shared rows (taking backlog
/// requests, acquiring a job lock) must be atomic with respect to other
/// processes using the same store.
pub trait Storage {
    // ===== Job Registry =====

    /// Inserts a job or updates its scheduling fields
    ///
    /// The lock state of an existing job is left untouched.
    ///
    /// # Returns
    ///
    /// The job ID (either newly created or existing)
    fn upsert_job(&mut self, job: &JobRecord) -> StorageResult<i64>;

    /// Resolves the ID of a job
    fn job_id(&self, namespace: &str, job: &str) -> StorageResult<Option<i64>>;

    /// Gets a job by identity
    fn get_job(&self, namespace: &str, job: &str) -> StorageResult<Option<JobRecord>>;

    /// Disables every enabled job not listed in `keep`
    ///
    /// Jobs whose definition disappeared keep their rows, backlog and
    /// statistics but no longer count as enabled.
    ///
    /// # Returns
    ///
    /// The number of jobs disabled
    fn disable_jobs_except(&mut self, keep: &[JobKey]) -> StorageResult<usize>;

    // ===== Request Backlog =====

    /// Persists a request into the backlog of a job
    ///
    /// A fresh id is generated; `created_at` is kept if set, otherwise the
    /// current time is used.
    ///
    /// # Returns
    ///
    /// The generated request id
    fn push_request(&mut self, job_id: i64, request: &FetchRequest) -> StorageResult<String>;

    /// Removes and returns up to `limit` backlog requests of a job
    ///
    /// Requests come highest priority first, oldest first within a priority.
    /// The returned rows are deleted in the same transaction that read them.
    fn take_requests(&mut self, job_id: i64, limit: usize) -> StorageResult<Vec<FetchRequest>>;

    /// Counts backlog requests of a job
    fn count_requests(&self, job_id: i64) -> StorageResult<u64>;

    /// Finds the enabled, unlocked job with the most backlog requests
    fn job_with_biggest_backlog(&self, now: DateTime<Utc>) -> StorageResult<Option<JobRecord>>;

    // ===== Execution Locks =====

    /// Sets `blocked_until` if the job is not blocked at `now`
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The block was placed
    /// * `Ok(false)` - The job is blocked by someone else
    /// * `Err(StorageError::JobNotFound)` - No such job
    fn try_block_job(
        &mut self,
        namespace: &str,
        job: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Clears `blocked_until` unconditionally
    fn clear_block(&mut self, namespace: &str, job: &str) -> StorageResult<()>;

    /// Gets the current `blocked_until` of a job
    fn blocked_until(&self, namespace: &str, job: &str) -> StorageResult<Option<DateTime<Utc>>>;

    // ===== Statistics =====

    /// Adds the counters of one finished run to the job's daily row
    ///
    /// Also increments the day's run count.
    fn record_run_stats(&mut self, job_id: i64, date: NaiveDate, stats: &RunStats)
        -> StorageResult<()>;

    /// Adds scraped items to the job's daily row
    fn add_scraped_items(&mut self, job_id: i64, date: NaiveDate, count: u64) -> StorageResult<()>;

    /// Gets the daily row of a job
    fn get_daily_stats(&self, job_id: i64, date: NaiveDate)
        -> StorageResult<Option<DailyStatsRecord>>;

    /// Lists enabled jobs that scraped fewer items than their threshold
    ///
    /// A day without a stats row counts as zero items; a threshold of zero
    /// never reports.
    fn jobs_below_item_threshold(&self, date: NaiveDate) -> StorageResult<Vec<ThresholdViolation>>;
}
