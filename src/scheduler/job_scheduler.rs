//! In-process job schedule
//!
//! The scheduler owns a min-heap of [`ScheduleEntry`] values and the last
//! known config of every enabled job. It is created empty at process start
//! and only changed by [`JobScheduler::apply_config`] and
//! [`JobScheduler::run_due_jobs`].
//!
//! Reconfiguring a pending job pushes an extra entry instead of moving the
//! old one, so a job can briefly have two pending entries. Entries whose
//! job disappeared are dropped when they come due, or earlier by
//! [`JobScheduler::prune_stale`].

use crate::config::{JobConfig, JobKey};
use crate::execution::{JobRunner, RunOptions};
use crate::scheduler::{ScheduleEntry, SchedulerError};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Heap size, relative to the number of known jobs, that triggers pruning
const PRUNE_FACTOR: usize = 2;

/// Decides which job runs next and when each job is due again
pub struct JobScheduler {
    heap: BinaryHeap<Reverse<ScheduleEntry>>,
    configs: HashMap<JobKey, JobConfig>,
    runners: HashMap<String, Box<dyn JobRunner>>,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            configs: HashMap::new(),
            runners: HashMap::new(),
        }
    }

    /// Registers the runner for an engine tag, replacing any previous one
    pub fn register_runner(&mut self, engine: &str, runner: Box<dyn JobRunner>) {
        self.runners.insert(engine.to_string(), runner);
    }

    pub fn has_runner(&self, engine: &str) -> bool {
        self.runners.contains_key(engine)
    }

    /// Replaces the known job set with `configs`
    ///
    /// Enabled jobs that are new or changed get an entry due immediately.
    /// Disabled jobs, and jobs with a zero recurrence, are ignored.
    ///
    /// # Returns
    ///
    /// The number of entries pushed
    pub fn apply_config(&mut self, configs: &[JobConfig]) -> usize {
        self.apply_config_at(configs, Utc::now())
    }

    /// Same as [`apply_config`](Self::apply_config) with an explicit clock
    pub fn apply_config_at(&mut self, configs: &[JobConfig], now: DateTime<Utc>) -> usize {
        let mut known = HashMap::with_capacity(configs.len());
        let mut scheduled = 0;

        for config in configs.iter().filter(|c| c.enabled) {
            let key = config.key();
            if config.recurrence_minutes == Some(0) {
                tracing::warn!("Ignoring {}: recurrence must be at least one minute", key);
                continue;
            }
            if self.configs.get(&key) != Some(config) {
                tracing::debug!("Scheduling {} to run now", key);
                self.heap.push(Reverse(ScheduleEntry::new(
                    now,
                    &config.engine,
                    &config.namespace,
                    &config.job_name,
                )));
                scheduled += 1;
            }
            known.insert(key, config.clone());
        }

        self.configs = known;

        if self.heap.len() > PRUNE_FACTOR * self.configs.len() {
            self.prune_stale();
        }

        scheduled
    }

    /// Runs every job that is due, one at a time
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - Number of jobs handed to a runner
    /// * `Err(SchedulerError::UnknownEngine)` - A due job names an engine
    ///   without a runner; the entry stays scheduled
    /// * `Err(SchedulerError::Runner)` - A run failed; the job was
    ///   rescheduled before the error was returned
    pub fn run_due_jobs(&mut self) -> Result<usize, SchedulerError> {
        self.run_due_with(Utc::now)
    }

    /// Same as [`run_due_jobs`](Self::run_due_jobs) with a fixed clock
    pub fn run_due_jobs_at(&mut self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        self.run_due_with(|| now)
    }

    fn run_due_with(&mut self, clock: impl Fn() -> DateTime<Utc>) -> Result<usize, SchedulerError> {
        let mut ran = 0;

        loop {
            let now = clock();
            let entry = match self.heap.peek() {
                Some(Reverse(entry)) if entry.due <= now => entry.clone(),
                _ => break,
            };
            self.heap.pop();

            let key = entry.key();
            let Some(config) = self.configs.get(&key).cloned() else {
                tracing::info!("Dropping schedule entry of removed job {}", key);
                continue;
            };

            let Some(runner) = self.runners.get_mut(&entry.engine) else {
                let engine = entry.engine.clone();
                self.heap.push(Reverse(entry));
                return Err(SchedulerError::UnknownEngine(engine));
            };

            let result = runner.run(&config, RunOptions::from_config(&config));
            ran += 1;

            self.reschedule(&key, clock());
            result?;
        }

        Ok(ran)
    }

    fn reschedule(&mut self, key: &JobKey, now: DateTime<Utc>) {
        let Some(config) = self.configs.get(key) else {
            return;
        };
        let Some(minutes) = config.recurrence_minutes else {
            tracing::debug!("{} runs once, not rescheduling", key);
            return;
        };

        let due = now + Duration::minutes(i64::from(minutes));
        tracing::debug!("{} due again at {}", key, due.to_rfc3339());
        self.heap.push(Reverse(ScheduleEntry::new(
            due,
            &config.engine,
            &config.namespace,
            &config.job_name,
        )));
    }

    /// Runs one job immediately, outside the schedule
    pub fn run_now(&mut self, config: &JobConfig, options: RunOptions) -> Result<(), SchedulerError> {
        let runner = self
            .runners
            .get_mut(&config.engine)
            .ok_or_else(|| SchedulerError::UnknownEngine(config.engine.clone()))?;
        runner.run(config, options)?;
        Ok(())
    }

    /// Drops pending entries of jobs that are no longer known
    ///
    /// # Returns
    ///
    /// The number of entries removed
    pub fn prune_stale(&mut self) -> usize {
        let before = self.heap.len();
        let configs = &self.configs;
        self.heap.retain(|Reverse(entry)| configs.contains_key(&entry.key()));
        let removed = before - self.heap.len();
        if removed > 0 {
            tracing::debug!("Pruned {} stale schedule entries", removed);
        }
        removed
    }

    /// Pending entries, earliest first
    pub fn pending_entries(&self) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> =
            self.heap.iter().map(|Reverse(entry)| entry.clone()).collect();
        entries.sort();
        entries
    }

    pub fn pending_count(&self) -> usize {
        self.heap.len()
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(entry)| entry.due)
    }

    pub fn known_config(&self, key: &JobKey) -> Option<&JobConfig> {
        self.configs.get(key)
    }

    pub fn known_job_count(&self) -> usize {
        self.configs.len()
    }
}
