//! Cross-process job lock
//!
//! A [`DistributedLock`] guards one (namespace, job) pair. The lock state is
//! the `blocked_until` column of the job's registry row, so every process
//! sharing the database sees the same lock. A crashed holder is recovered
//! only by expiry; there is no renewal.

use crate::storage::{with_storage, SharedStorage, Storage, StorageError};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Default time a lock stays valid without being released
pub const DEFAULT_LOCK_TTL_MINUTES: i64 = 30;

/// Errors that can occur during lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Job {namespace}/{job} is locked by another executor")]
    Contended { namespace: String, job: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Default lock lifetime
pub fn default_ttl() -> Duration {
    Duration::minutes(DEFAULT_LOCK_TTL_MINUTES)
}

/// Mutual exclusion for one job across processes sharing a store
pub struct DistributedLock<S: Storage> {
    storage: SharedStorage<S>,
    namespace: String,
    job: String,
}

impl<S: Storage> DistributedLock<S> {
    pub fn new(storage: SharedStorage<S>, namespace: &str, job: &str) -> Self {
        Self {
            storage,
            namespace: namespace.to_string(),
            job: job.to_string(),
        }
    }

    /// Takes the lock for `ttl`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The lock is held until now + ttl
    /// * `Err(LockError::Contended)` - Someone else holds it; skip the run
    pub fn acquire(&self, ttl: Duration) -> LockResult<()> {
        self.acquire_at(ttl, Utc::now())
    }

    /// Takes the lock as of `now`
    pub fn acquire_at(&self, ttl: Duration, now: DateTime<Utc>) -> LockResult<()> {
        let until = now + ttl;
        let acquired = with_storage(&self.storage, |s| {
            s.try_block_job(&self.namespace, &self.job, until, now)
        })?;

        if !acquired {
            return Err(LockError::Contended {
                namespace: self.namespace.clone(),
                job: self.job.clone(),
            });
        }

        tracing::debug!(
            "Locked {}/{} until {}",
            self.namespace,
            self.job,
            until.to_rfc3339()
        );
        Ok(())
    }

    pub fn is_locked(&self) -> LockResult<bool> {
        self.is_locked_at(Utc::now())
    }

    /// True iff the lock is held at `now`
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> LockResult<bool> {
        let until = with_storage(&self.storage, |s| s.blocked_until(&self.namespace, &self.job))?;
        Ok(matches!(until, Some(until) if until >= now))
    }

    /// Clears the lock, whoever holds it
    pub fn release(&self) -> LockResult<()> {
        with_storage(&self.storage, |s| s.clear_block(&self.namespace, &self.job))?;
        tracing::debug!("Released lock of {}/{}", self.namespace, self.job);
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn job(&self) -> &str {
        &self.job
    }
}
