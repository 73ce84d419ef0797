//! Per-job hybrid request queue
//!
//! A [`RequestQueue`] keeps at most `capacity` requests of one job run in
//! memory and spills the rest into the durable backlog. The same ceiling
//! meters the dequeue side: a run never pulls more than `capacity`
//! requests out of the backlog, so a job catching up on a large backlog
//! does not flood memory either.

mod callbacks;
mod dupefilter;
mod memory;
mod request;

pub use callbacks::{CallbackRef, CallbackRegistry};
pub use dupefilter::{request_fingerprint, DuplicateFilter, FingerprintFilter};
pub use memory::MemoryQueue;
pub use request::{Cookies, FetchRequest, HeaderValue, Headers, Meta};

use crate::storage::{with_storage, RunStats, SharedStorage, Storage, StorageError};
use chrono::Utc;
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors that can occur during queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Duplicate filter error: {0}")]
    Filter(String),

    #[error("Unknown callback key '{0}'")]
    UnknownCallback(String),

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Bounded in-memory queue with a durable overflow backlog
pub struct RequestQueue<S: Storage, F: DuplicateFilter> {
    storage: SharedStorage<S>,
    filter: F,
    namespace: String,
    job: String,
    job_id: i64,
    capacity: usize,
    memory: MemoryQueue,
    callback_keys: Option<BTreeSet<String>>,
    handed_out: usize,
    stats: RunStats,
}

impl<S: Storage, F: DuplicateFilter> RequestQueue<S, F> {
    /// Opens the queue of one job run
    ///
    /// # Arguments
    ///
    /// * `storage` - Shared durable store holding the backlog
    /// * `filter` - Duplicate filter, opened here for the new run
    /// * `namespace` / `job` - Identity of the owning job
    /// * `capacity` - Maximum resident requests, and maximum backlog pulls
    ///
    /// # Returns
    ///
    /// * `Ok(RequestQueue)` - Queue ready for use
    /// * `Err(QueueError::Storage(StorageError::JobNotFound))` - The job is
    ///   not in the registry
    pub fn open(
        storage: SharedStorage<S>,
        mut filter: F,
        namespace: &str,
        job: &str,
        capacity: usize,
    ) -> QueueResult<Self> {
        let job_id = with_storage(&storage, |s| s.job_id(namespace, job))?.ok_or_else(|| {
            StorageError::JobNotFound {
                namespace: namespace.to_string(),
                job: job.to_string(),
            }
        })?;

        filter.open()?;

        tracing::debug!(
            "Opened request queue for {}/{} (capacity {})",
            namespace,
            job,
            capacity
        );

        Ok(Self {
            storage,
            filter,
            namespace: namespace.to_string(),
            job: job.to_string(),
            job_id,
            capacity,
            memory: MemoryQueue::new(),
            callback_keys: None,
            handed_out: 0,
            stats: RunStats::default(),
        })
    }

    /// Checks admitted requests, and requests pulled from the backlog,
    /// against the job's handlers
    pub fn with_callbacks<H>(mut self, registry: &CallbackRegistry<H>) -> Self {
        self.callback_keys = Some(registry.keys().map(str::to_string).collect());
        self
    }

    /// Admits a request
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Admitted, into memory or into the backlog
    /// * `Ok(false)` - Rejected as a duplicate
    /// * `Err(QueueError::UnknownCallback)` - The request names a handler
    ///   missing from the registry; nothing was stored
    pub fn enqueue(&mut self, request: FetchRequest) -> QueueResult<bool> {
        if let Some(unknown) = self.find_unknown_callback(std::slice::from_ref(&request)) {
            return Err(QueueError::UnknownCallback(unknown));
        }

        if !request.dont_filter && self.filter.seen(&request)? {
            tracing::debug!("Filtered duplicate request {}", request.url);
            return Ok(false);
        }

        if self.stats.enqueued() < self.capacity as u64 {
            self.memory.push(request);
            self.stats.enqueued_memory += 1;
        } else {
            let job_id = self.job_id;
            with_storage(&self.storage, |s| s.push_request(job_id, &request))?;
            self.stats.enqueued_disk += 1;
        }

        Ok(true)
    }

    /// Hands out the next request
    ///
    /// Resident requests come first. When memory is empty and the run's
    /// budget allows, a batch is pulled from the backlog: the best request
    /// is returned and the rest become resident.
    pub fn dequeue(&mut self) -> QueueResult<Option<FetchRequest>> {
        if let Some(request) = self.memory.pop() {
            self.stats.dequeued_memory += 1;
            self.handed_out += 1;
            return Ok(Some(request));
        }

        if self.handed_out >= self.capacity {
            return Ok(None);
        }

        let budget = self.capacity - self.handed_out;
        let job_id = self.job_id;
        let mut batch = with_storage(&self.storage, |s| s.take_requests(job_id, budget))?;
        if batch.is_empty() {
            return Ok(None);
        }

        if let Some(unknown) = self.find_unknown_callback(&batch) {
            // Put the batch back untouched before failing the run
            with_storage(&self.storage, |s| {
                for request in &batch {
                    s.push_request(job_id, request)?;
                }
                Ok(())
            })?;
            tracing::error!(
                "Backlog of {}/{} references unregistered callback '{}'",
                self.namespace,
                self.job,
                unknown
            );
            return Err(QueueError::UnknownCallback(unknown));
        }

        self.stats.dequeued_disk += batch.len() as u64;
        tracing::debug!(
            "Pulled {} requests from the backlog of {}/{}",
            batch.len(),
            self.namespace,
            self.job
        );

        let first = batch.remove(0);
        for request in batch {
            self.memory.push(request);
            self.stats.enqueued_memory += 1;
        }

        self.handed_out += 1;
        Ok(Some(first))
    }

    fn find_unknown_callback(&self, batch: &[FetchRequest]) -> Option<String> {
        let keys = self.callback_keys.as_ref()?;
        batch
            .iter()
            .flat_map(|r| r.callback_keys())
            .find(|key| !keys.contains(key.as_str()))
            .map(|key| key.to_string())
    }

    /// True iff nothing is resident; the backlog may still hold requests
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Number of resident requests
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Number of requests waiting in the backlog of this job
    pub fn backlog_len(&self) -> QueueResult<u64> {
        let job_id = self.job_id;
        Ok(with_storage(&self.storage, |s| s.count_requests(job_id))?)
    }

    pub fn record_retry(&mut self) {
        self.stats.retries += 1;
    }

    pub fn record_items(&mut self, count: u64) {
        self.stats.items_scraped += count;
    }

    /// Counters of this run so far
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Ends the run
    ///
    /// Resident requests that were never handed out go back into the
    /// backlog, the duplicate filter is closed, and the run's counters are
    /// added to today's statistics.
    pub fn close(mut self, reason: &str) -> QueueResult<RunStats> {
        let job_id = self.job_id;
        let mut leftover = Vec::with_capacity(self.memory.len());
        while let Some(request) = self.memory.pop() {
            leftover.push(request);
        }
        if !leftover.is_empty() {
            with_storage(&self.storage, |s| {
                for request in &leftover {
                    s.push_request(job_id, request)?;
                }
                Ok(())
            })?;
            tracing::info!(
                "Returned {} unprocessed requests of {}/{} to the backlog",
                leftover.len(),
                self.namespace,
                self.job
            );
        }

        self.filter.close(reason)?;

        let stats = self.stats;
        let today = Utc::now().date_naive();
        with_storage(&self.storage, |s| s.record_run_stats(job_id, today, &stats))?;

        tracing::info!(
            "Closed queue of {}/{} ({}): {} enqueued, {} from backlog, {} items",
            self.namespace,
            self.job,
            reason,
            stats.enqueued(),
            stats.dequeued_disk,
            stats.items_scraped
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{share, JobRecord, SqliteStorage};

    fn shared_with_job() -> SharedStorage<SqliteStorage> {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut job = JobRecord::from_config(&crate::config::JobConfig::new("unit-tests", "spider"));
        job.enabled = true;
        storage.upsert_job(&job).unwrap();
        share(storage)
    }

    fn open(
        storage: &SharedStorage<SqliteStorage>,
        capacity: usize,
    ) -> RequestQueue<SqliteStorage, FingerprintFilter> {
        RequestQueue::open(
            storage.clone(),
            FingerprintFilter::new(),
            "unit-tests",
            "spider",
            capacity,
        )
        .unwrap()
    }

    fn request(path: &str) -> FetchRequest {
        FetchRequest::new(&format!("https://example.com{}", path)).unwrap()
    }

    #[test]
    fn test_open_unknown_job() {
        let storage = share(SqliteStorage::new_in_memory().unwrap());
        let result = RequestQueue::open(storage, FingerprintFilter::new(), "nope", "nope", 5);
        assert!(matches!(
            result,
            Err(QueueError::Storage(StorageError::JobNotFound { .. }))
        ));
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let storage = shared_with_job();
        let mut queue = open(&storage, 10);

        assert!(queue.enqueue(request("/a")).unwrap());
        assert!(!queue.enqueue(request("/a")).unwrap());
        assert!(queue.enqueue(request("/a").dont_filter()).unwrap());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_overflow_goes_to_backlog() {
        let storage = shared_with_job();
        let mut queue = open(&storage, 2);

        for i in 0..5 {
            assert!(queue.enqueue(request(&format!("/{}", i))).unwrap());
        }

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.backlog_len().unwrap(), 3);
        assert_eq!(queue.stats().enqueued_memory, 2);
        assert_eq!(queue.stats().enqueued_disk, 3);
    }

    #[test]
    fn test_dequeue_budget_limits_backlog_pulls() {
        let storage = shared_with_job();
        let mut queue = open(&storage, 0);
        for i in 0..3 {
            queue.enqueue(request(&format!("/{}", i))).unwrap();
        }

        // capacity 0 spills everything and pulls nothing back
        assert!(queue.dequeue().unwrap().is_none());
        assert_eq!(queue.backlog_len().unwrap(), 3);
    }

    #[test]
    fn test_unknown_callback_keeps_backlog() {
        let storage = shared_with_job();
        let mut writer = open(&storage, 0);
        writer
            .enqueue(request("/a").with_callback("parse_listing"))
            .unwrap();
        writer.enqueue(request("/b").with_callback("parse_item")).unwrap();

        let mut registry: CallbackRegistry<()> = CallbackRegistry::new();
        registry.register("parse_item", ());

        let mut reader = open(&storage, 5).with_callbacks(&registry);
        match reader.dequeue() {
            Err(QueueError::UnknownCallback(key)) => assert_eq!(key, "parse_listing"),
            other => panic!("expected UnknownCallback, got {:?}", other.map(|r| r.map(|r| r.url))),
        }
        assert_eq!(reader.backlog_len().unwrap(), 2);
    }

    #[test]
    fn test_unregistered_callback_is_rejected_on_enqueue() {
        let storage = shared_with_job();
        let mut registry: CallbackRegistry<()> = CallbackRegistry::new();
        registry.register("parse", ());

        let mut queue = open(&storage, 0).with_callbacks(&registry);
        match queue.enqueue(request("/typo").with_callback("prase")) {
            Err(QueueError::UnknownCallback(key)) => assert_eq!(key, "prase"),
            other => panic!("expected UnknownCallback, got {:?}", other),
        }
        assert!(matches!(
            queue.enqueue(request("/errback").with_errback("on_eror")),
            Err(QueueError::UnknownCallback(_))
        ));
        assert!(queue.enqueue(request("/ok").with_callback("parse")).unwrap());
        assert_eq!(queue.backlog_len().unwrap(), 1);
        assert_eq!(queue.stats().enqueued(), 1);

        // The rejected URL was never marked as seen
        assert!(queue.enqueue(request("/typo").with_callback("parse")).unwrap());

        let mut next_run = open(&storage, 5).with_callbacks(&registry);
        let mut urls = Vec::new();
        while let Some(request) = next_run.dequeue().unwrap() {
            urls.push(request.url);
        }
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_close_returns_leftovers_and_records_stats() {
        let storage = shared_with_job();
        let mut queue = open(&storage, 5);
        queue.enqueue(request("/a")).unwrap();
        queue.enqueue(request("/b")).unwrap();
        queue.dequeue().unwrap();
        queue.record_items(7);
        queue.record_retry();

        let stats = queue.close("finished").unwrap();
        assert_eq!(stats.items_scraped, 7);
        assert_eq!(stats.retries, 1);

        let guard = storage.lock().unwrap();
        let job_id = guard.job_id("unit-tests", "spider").unwrap().unwrap();
        assert_eq!(guard.count_requests(job_id).unwrap(), 1);

        let daily = guard
            .get_daily_stats(job_id, Utc::now().date_naive())
            .unwrap()
            .unwrap();
        assert_eq!(daily.number_of_runs, 1);
        assert_eq!(daily.stats.enqueued_memory, 2);
        assert_eq!(daily.stats.dequeued_memory, 1);
    }
}
