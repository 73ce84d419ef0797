//! Scheduler daemon
//!
//! One daemon process repeatedly reloads job definitions, syncs them into
//! the job registry, applies them to its [`JobScheduler`] and runs whatever
//! is due, one job at a time. Concurrency across jobs comes from running
//! several daemons against the same database; the job lock keeps them from
//! running the same job twice.

use crate::config::{JobConfig, JobKey, Settings};
use crate::execution::{
    CommandRunner, ExclusiveRunner, JobRunner, RunOptions, DATABASE_ENV, QUEUE_CAPACITY_ENV,
};
use crate::scheduler::{JobScheduler, JobSource, SchedulerError};
use crate::storage::{with_storage, JobRecord, SharedStorage, Storage};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;

/// Long-running scheduler process state
pub struct Daemon<S: Storage + 'static, J: JobSource> {
    settings: Settings,
    source: J,
    storage: SharedStorage<S>,
    scheduler: JobScheduler,
}

impl<S: Storage + 'static, J: JobSource> Daemon<S, J> {
    /// Creates a daemon with one command runner per configured engine
    ///
    /// Engines learn the database path and queue capacity through their
    /// environment, so they can open their own [`crate::RequestQueue`].
    /// With `use-lock` enabled every runner is wrapped in an
    /// [`ExclusiveRunner`] sharing the daemon's storage.
    pub fn new(settings: Settings, source: J, storage: SharedStorage<S>) -> Self {
        let mut scheduler = JobScheduler::new();
        let ttl = chrono::Duration::minutes(i64::from(settings.scheduler.lock_ttl_minutes));

        for engine in &settings.engines {
            let runner = CommandRunner::new(engine.clone())
                .with_env(DATABASE_ENV, settings.storage.database_path.clone())
                .with_env(
                    QUEUE_CAPACITY_ENV,
                    settings.scheduler.queue_capacity.to_string(),
                );
            let runner: Box<dyn JobRunner> = if settings.scheduler.use_lock {
                Box::new(ExclusiveRunner::new(runner, storage.clone(), ttl))
            } else {
                Box::new(runner)
            };
            scheduler.register_runner(&engine.name, runner);
        }

        Self {
            settings,
            source,
            storage,
            scheduler,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn storage(&self) -> &SharedStorage<S> {
        &self.storage
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut JobScheduler {
        &mut self.scheduler
    }

    /// Reloads job definitions and writes them to the job registry
    ///
    /// Rejected definitions are logged and left out. Registry jobs without
    /// a loaded definition are disabled, so their leftover backlog is not
    /// picked by [`crawl_backlog`](Self::crawl_backlog).
    pub fn sync(&mut self) -> Result<Vec<JobConfig>, SchedulerError> {
        let report = self.source.load()?;

        for (path, error) in &report.rejected {
            tracing::warn!("Rejected job definition {}: {}", path.display(), error);
        }

        let keys: Vec<JobKey> = report.configs.iter().map(JobConfig::key).collect();
        let disabled = with_storage(&self.storage, |s| {
            for config in &report.configs {
                s.upsert_job(&JobRecord::from_config(config))?;
            }
            s.disable_jobs_except(&keys)
        })?;
        if disabled > 0 {
            tracing::info!("Disabled {} jobs without a definition", disabled);
        }

        Ok(report.configs)
    }

    /// One scheduler iteration: reload, apply, run what is due
    ///
    /// # Returns
    ///
    /// The number of jobs run
    pub fn tick(&mut self) -> Result<usize, SchedulerError> {
        let configs = self.sync()?;

        let scheduled = self.scheduler.apply_config(&configs);
        if scheduled > 0 {
            tracing::info!("{} new or changed jobs scheduled", scheduled);
        }

        self.scheduler.run_due_jobs()
    }

    /// Runs one job immediately, regardless of its schedule
    pub fn crawl(&mut self, namespace: &str, job: &str, options: RunOptions) -> Result<(), SchedulerError> {
        let configs = self.sync()?;
        let key = JobKey::new(namespace, job);

        let config = configs
            .into_iter()
            .find(|c| c.key() == key)
            .ok_or_else(|| SchedulerError::UnknownJob(key.to_string()))?;

        self.scheduler.run_now(&config, options)
    }

    /// Drains the backlog of the enabled, unlocked job with the most
    /// persisted requests
    ///
    /// # Returns
    ///
    /// The job that was run, or `None` if no backlog is waiting
    pub fn crawl_backlog(&mut self) -> Result<Option<JobKey>, SchedulerError> {
        let configs = self.sync()?;

        let now = Utc::now();
        let Some(record) = with_storage(&self.storage, |s| s.job_with_biggest_backlog(now))? else {
            tracing::info!("No backlog waiting");
            return Ok(None);
        };

        let key = JobKey::new(&record.namespace, &record.name);
        let config = configs
            .into_iter()
            .find(|c| c.key() == key)
            .ok_or_else(|| SchedulerError::UnknownJob(key.to_string()))?;

        let options = RunOptions {
            backlog: true,
            ..RunOptions::from_config(&config)
        };
        self.scheduler.run_now(&config, options)?;

        Ok(Some(key))
    }

    /// Ticks until ctrl-c
    pub async fn run(&mut self) -> Result<(), SchedulerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Ticks until `shutdown` completes
    ///
    /// Ticks are blocking and run on the current worker thread; a tick in
    /// progress always finishes before shutdown is observed. Requires the
    /// multi-threaded runtime.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<(), SchedulerError> {
        let interval = Duration::from_secs(self.settings.scheduler.tick_interval_secs);
        tokio::pin!(shutdown);

        tracing::info!(
            "Scheduler started, ticking every {}s",
            self.settings.scheduler.tick_interval_secs
        );

        loop {
            let ran = tokio::task::block_in_place(|| self.tick())?;
            tracing::debug!(
                "Tick finished: {} jobs run, {} pending",
                ran,
                self.scheduler.pending_count()
            );

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping scheduler");
                    break;
                }
            }
        }

        Ok(())
    }
}
