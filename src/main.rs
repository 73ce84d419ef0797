//! Highrise main entry point
//!
//! This is the command-line interface for the Highrise crawl job scheduler.

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use highrise::config::{load_job_configs, load_settings_with_hash, Settings};
use highrise::execution::RunOptions;
use highrise::output::{
    load_job_stats, load_threshold_report, print_job_stats, print_schedule, print_threshold_report,
};
use highrise::scheduler::{Daemon, DirectoryJobSource};
use highrise::storage::{open_storage, share, SqliteStorage};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Highrise: recurring crawl job coordination
///
/// Highrise runs many independent crawl jobs on their schedules, keeps
/// their request backlogs in a shared SQLite database and makes sure no
/// two scheduler processes run the same job at once.
#[derive(Parser, Debug)]
#[command(name = "highrise")]
#[command(version = "1.0.0")]
#[command(about = "Recurring crawl job scheduler", long_about = None)]
struct Cli {
    /// Path to TOML settings file
    #[arg(short, long, value_name = "CONFIG", default_value = "highrise.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler loop until interrupted
    Run,

    /// Run one job now, outside its schedule
    Crawl {
        namespace: String,
        job: String,

        /// Route traffic through the engine's proxy
        #[arg(long)]
        use_tor: bool,

        /// Only drain the job's backlog
        #[arg(long)]
        backlog: bool,
    },

    /// Drain the backlog of the job with the most persisted requests
    CrawlBacklog,

    /// List jobs that scraped fewer items than their daily threshold
    CheckItemCount {
        /// Day to check (YYYY-MM-DD), defaults to today in UTC
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show the daily counters of one job
    Stats {
        namespace: String,
        job: String,

        /// Day to show (YYYY-MM-DD), defaults to today in UTC
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Validate job definitions and show what would be scheduled
    ShowSchedule,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading settings from: {}", cli.config.display());
    let (settings, hash) = load_settings_with_hash(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    tracing::info!("Settings loaded successfully (hash: {})", hash);

    match cli.command {
        Command::Run => handle_run(settings).await,
        Command::Crawl {
            namespace,
            job,
            use_tor,
            backlog,
        } => handle_crawl(settings, &namespace, &job, RunOptions { use_tor, backlog }),
        Command::CrawlBacklog => handle_crawl_backlog(settings),
        Command::CheckItemCount { date } => handle_check_item_count(&settings, date),
        Command::Stats {
            namespace,
            job,
            date,
        } => handle_stats(&settings, &namespace, &job, date),
        Command::ShowSchedule => handle_show_schedule(&settings),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("highrise=info,warn"),
            1 => EnvFilter::new("highrise=debug,info"),
            2 => EnvFilter::new("highrise=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_database(settings: &Settings) -> anyhow::Result<SqliteStorage> {
    open_storage(Path::new(&settings.storage.database_path))
        .with_context(|| format!("failed to open database {}", settings.storage.database_path))
}

fn build_daemon(settings: Settings) -> anyhow::Result<Daemon<SqliteStorage, DirectoryJobSource>> {
    let storage = share(open_database(&settings)?);
    let source = DirectoryJobSource::new(&settings.jobs.directory);
    Ok(Daemon::new(settings, source, storage))
}

/// Handles `run`: the long-running scheduler loop
async fn handle_run(settings: Settings) -> anyhow::Result<ExitCode> {
    tracing::info!(
        "Engines: {}, job definitions: {}",
        settings.engines.len(),
        settings.jobs.directory
    );

    let mut daemon = build_daemon(settings)?;
    match daemon.run().await {
        Ok(()) => {
            tracing::info!("Scheduler stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!("Scheduler failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles `crawl`: runs one job immediately
fn handle_crawl(
    settings: Settings,
    namespace: &str,
    job: &str,
    options: RunOptions,
) -> anyhow::Result<ExitCode> {
    let mut daemon = build_daemon(settings)?;
    daemon
        .crawl(namespace, job, options)
        .with_context(|| format!("crawl of {}/{} failed", namespace, job))?;
    Ok(ExitCode::SUCCESS)
}

/// Handles `crawl-backlog`
fn handle_crawl_backlog(settings: Settings) -> anyhow::Result<ExitCode> {
    let mut daemon = build_daemon(settings)?;
    match daemon.crawl_backlog()? {
        Some(key) => println!("Drained backlog of {}", key),
        None => println!("No backlog waiting"),
    }
    Ok(ExitCode::SUCCESS)
}

/// Handles `check-item-count`: exits with failure if any job is below
/// its threshold
fn handle_check_item_count(settings: &Settings, date: Option<NaiveDate>) -> anyhow::Result<ExitCode> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let storage = open_database(settings)?;

    let report = load_threshold_report(&storage, date)?;
    print_threshold_report(&report);

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Handles `stats`
fn handle_stats(
    settings: &Settings,
    namespace: &str,
    job: &str,
    date: Option<NaiveDate>,
) -> anyhow::Result<ExitCode> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let storage = open_database(settings)?;

    let record = load_job_stats(&storage, namespace, job, date)?;
    print_job_stats(&format!("{}/{}", namespace, job), date, record.as_ref());

    Ok(ExitCode::SUCCESS)
}

/// Handles `show-schedule`: exits with failure if any definition is rejected
fn handle_show_schedule(settings: &Settings) -> anyhow::Result<ExitCode> {
    let report = load_job_configs(Path::new(&settings.jobs.directory)).with_context(|| {
        format!("failed to read job definitions from {}", settings.jobs.directory)
    })?;

    print_schedule(settings, &report);

    if report.rejected.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
