//! Lock-guarded job execution

use crate::config::JobConfig;
use crate::execution::{JobRunner, RunOptions, RunnerError};
use crate::lock::{DistributedLock, LockError};
use crate::storage::{SharedStorage, Storage};
use chrono::Duration;

/// Runs a job only while holding its [`DistributedLock`]
///
/// A job locked by another executor is skipped, not retried. The lock is
/// released after the run, whether it succeeded or not.
pub struct ExclusiveRunner<R: JobRunner, S: Storage> {
    inner: R,
    storage: SharedStorage<S>,
    ttl: Duration,
}

impl<R: JobRunner, S: Storage> ExclusiveRunner<R, S> {
    pub fn new(inner: R, storage: SharedStorage<S>, ttl: Duration) -> Self {
        Self {
            inner,
            storage,
            ttl,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: JobRunner, S: Storage> JobRunner for ExclusiveRunner<R, S> {
    fn run(&mut self, job: &JobConfig, options: RunOptions) -> Result<(), RunnerError> {
        let lock = DistributedLock::new(self.storage.clone(), &job.namespace, &job.job_name);

        match lock.acquire(self.ttl) {
            Ok(()) => {}
            Err(LockError::Contended { namespace, job }) => {
                tracing::info!("{}/{} is running elsewhere, skipping", namespace, job);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let result = self.inner.run(job, options);

        if let Err(e) = lock.release() {
            if result.is_ok() {
                return Err(e.into());
            }
            tracing::error!(
                "Failed to release lock of {}/{}: {}",
                job.namespace,
                job.job_name,
                e
            );
        }

        result
    }
}
