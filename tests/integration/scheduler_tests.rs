//! Scheduler behavior with real job definition directories

use chrono::{Duration, Utc};
use highrise::config::{parse_settings, JobConfig, JobKey, Settings};
use highrise::execution::{JobRunner, RunOptions, RunnerError};
use highrise::scheduler::{Daemon, DirectoryJobSource, JobScheduler, JobSource};
use highrise::storage::{share, SqliteStorage, Storage};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct RecordingRunner {
    runs: Arc<Mutex<Vec<(String, RunOptions)>>>,
}

impl RecordingRunner {
    fn runs(&self) -> Vec<(String, RunOptions)> {
        self.runs.lock().unwrap().clone()
    }
}

impl JobRunner for RecordingRunner {
    fn run(&mut self, job: &JobConfig, options: RunOptions) -> Result<(), RunnerError> {
        self.runs.lock().unwrap().push((job.key().to_string(), options));
        Ok(())
    }
}

fn scheduler() -> (JobScheduler, RecordingRunner) {
    let runner = RecordingRunner::default();
    let mut scheduler = JobScheduler::new();
    scheduler.register_runner("custom", Box::new(runner.clone()));
    (scheduler, runner)
}

fn job(name: &str, recurrence: Option<u32>) -> JobConfig {
    let mut config = JobConfig::new("unit-tests", name);
    config.enabled = true;
    config.recurrence_minutes = recurrence;
    config
}

fn write_job(root: &Path, namespace: &str, job: &str, content: &str) {
    let dir = root.join(namespace);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{}.toml", job)), content).unwrap();
}

#[test]
fn test_recurring_job_gets_one_new_entry() {
    let (mut scheduler, runner) = scheduler();

    let before = Utc::now();
    scheduler.apply_config(&[job("hourly", Some(120))]);
    assert_eq!(scheduler.run_due_jobs().unwrap(), 1);
    let after = Utc::now();

    assert_eq!(runner.runs().len(), 1);
    let pending = scheduler.pending_entries();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].due >= before + Duration::minutes(120));
    assert!(pending[0].due <= after + Duration::minutes(120));
}

#[test]
fn test_run_once_job_leaves_no_entry() {
    let (mut scheduler, runner) = scheduler();

    scheduler.apply_config(&[job("once", None)]);
    scheduler.run_due_jobs().unwrap();

    assert_eq!(runner.runs().len(), 1);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn test_hot_reload_only_schedules_changes() {
    let (mut scheduler, _) = scheduler();
    let now = Utc::now();

    assert_eq!(scheduler.apply_config_at(&[job("news", Some(60))], now), 1);
    assert_eq!(scheduler.apply_config_at(&[job("news", Some(60))], now), 0);
    assert_eq!(scheduler.pending_count(), 1);

    let mut changed = job("news", Some(60));
    changed.use_tor = true;
    assert_eq!(scheduler.apply_config_at(&[changed], now), 1);
    assert_eq!(scheduler.pending_count(), 2);
}

#[test]
fn test_threshold_and_job_data_do_not_trigger_rerun() {
    let (mut scheduler, _) = scheduler();
    let now = Utc::now();
    scheduler.apply_config_at(&[job("news", Some(60))], now);

    let mut tweaked = job("news", Some(60));
    tweaked.items_daily_threshold = 100;
    tweaked
        .job_data
        .insert("section".to_string(), toml::Value::String("world".to_string()));

    assert_eq!(scheduler.apply_config_at(&[tweaked], now), 0);
    let known = scheduler
        .known_config(&JobKey::new("unit-tests", "news"))
        .unwrap();
    assert_eq!(known.items_daily_threshold, 100);
}

#[test]
fn test_directory_source_loads_and_rejects() {
    let dir = TempDir::new().unwrap();
    write_job(
        dir.path(),
        "news",
        "frontpage",
        "recurrence-minutes = 30\nenabled = true\n\n[job-data]\nstart = \"https://example.com\"\n",
    );
    write_job(dir.path(), "news", "archive", "");
    write_job(dir.path(), "news", "broken", "recurrence-minutes = \"soon\"\n");
    fs::write(dir.path().join("news").join("README.md"), "not a job").unwrap();

    let mut source = DirectoryJobSource::new(dir.path());
    let report = source.load().unwrap();

    let keys: Vec<String> = report.configs.iter().map(|c| c.key().to_string()).collect();
    assert_eq!(keys, vec!["news/archive", "news/frontpage"]);
    assert_eq!(report.rejected.len(), 1);
    assert!(report.rejected[0].0.ends_with("broken.toml"));

    let (mut scheduler, _) = scheduler();
    assert_eq!(scheduler.apply_config(&report.configs), 1);
}

fn settings(jobs: &Path) -> Settings {
    let content = format!(
        r#"
[storage]
database-path = "unused.db"

[scheduler]
tick-interval-secs = 1
use-lock = true

[jobs]
directory = "{}"
"#,
        jobs.display()
    );
    parse_settings(&content).unwrap()
}

#[test]
fn test_daemon_tick_follows_definition_changes() {
    let dir = TempDir::new().unwrap();
    let jobs = dir.path().join("jobs");
    write_job(&jobs, "news", "frontpage", "recurrence-minutes = 60\nenabled = true\n");

    let storage = share(SqliteStorage::new_in_memory().unwrap());
    let mut daemon = Daemon::new(
        settings(&jobs),
        DirectoryJobSource::new(&jobs),
        storage.clone(),
    );
    let runner = RecordingRunner::default();
    daemon
        .scheduler_mut()
        .register_runner("custom", Box::new(runner.clone()));

    assert_eq!(daemon.tick().unwrap(), 1);
    assert_eq!(daemon.tick().unwrap(), 0);

    // Editing the definition schedules an immediate run
    write_job(&jobs, "news", "frontpage", "recurrence-minutes = 15\nenabled = true\n");
    assert_eq!(daemon.tick().unwrap(), 1);

    // Removing it drops the pending entries
    fs::remove_file(jobs.join("news").join("frontpage.toml")).unwrap();
    assert_eq!(daemon.tick().unwrap(), 0);
    assert_eq!(daemon.scheduler().pending_count(), 0);

    assert_eq!(runner.runs().len(), 2);
    let guard = storage.lock().unwrap();
    let record = guard.get_job("news", "frontpage").unwrap().unwrap();
    assert_eq!(record.recurrence_minutes, Some(15));
}

#[test]
fn test_crawl_backlog_picks_biggest_backlog() {
    let dir = TempDir::new().unwrap();
    let jobs = dir.path().join("jobs");
    write_job(&jobs, "news", "small", "enabled = true\n");
    write_job(&jobs, "news", "big", "enabled = true\nuse-tor = true\n");

    let storage = share(SqliteStorage::new_in_memory().unwrap());
    let mut daemon = Daemon::new(
        settings(&jobs),
        DirectoryJobSource::new(&jobs),
        storage.clone(),
    );
    let runner = RecordingRunner::default();
    daemon
        .scheduler_mut()
        .register_runner("custom", Box::new(runner.clone()));
    daemon.sync().unwrap();

    {
        let mut guard = storage.lock().unwrap();
        let small = guard.job_id("news", "small").unwrap().unwrap();
        let big = guard.job_id("news", "big").unwrap().unwrap();
        let request = highrise::FetchRequest::new("https://example.com/").unwrap();
        guard.push_request(small, &request).unwrap();
        guard.push_request(big, &request).unwrap();
        guard.push_request(big, &request).unwrap();
    }

    let key = daemon.crawl_backlog().unwrap().unwrap();
    assert_eq!(key, JobKey::new("news", "big"));

    let runs = runner.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(
        runs[0].1,
        RunOptions {
            use_tor: true,
            backlog: true
        }
    );
}
