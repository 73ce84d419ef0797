//! Statistics reports from the job database
//!
//! This module provides functionality for extracting and displaying the
//! daily per-job counters recorded by request queues.

use crate::storage::{DailyStatsRecord, Storage, StorageError, StorageResult, ThresholdViolation};
use chrono::NaiveDate;
use std::fmt;

/// Jobs that scraped fewer items than expected on one day
#[derive(Debug, Clone)]
pub struct ThresholdReport {
    pub date: NaiveDate,
    pub violations: Vec<ThresholdViolation>,
}

impl ThresholdReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Loads the threshold report for a day
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `date` - Day to check
///
/// # Returns
///
/// * `Ok(ThresholdReport)` - Successfully loaded report
/// * `Err(StorageError)` - Failed to query the database
pub fn load_threshold_report(storage: &dyn Storage, date: NaiveDate) -> StorageResult<ThresholdReport> {
    let violations = storage.jobs_below_item_threshold(date)?;
    Ok(ThresholdReport { date, violations })
}

impl fmt::Display for ThresholdReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return writeln!(f, "All jobs reached their item threshold on {}", self.date);
        }

        writeln!(
            f,
            "{} jobs below their item threshold on {}:",
            self.violations.len(),
            self.date
        )?;
        for violation in &self.violations {
            writeln!(
                f,
                "  {}/{}: {} items scraped, threshold {}",
                violation.namespace, violation.job, violation.items_scraped, violation.threshold
            )?;
        }
        Ok(())
    }
}

/// Renders the threshold report, one line per job
pub fn format_threshold_report(report: &ThresholdReport) -> String {
    report.to_string()
}

/// Prints the threshold report to stdout
pub fn print_threshold_report(report: &ThresholdReport) {
    print!("{}", report);
}

/// Loads the daily counters of one job
///
/// A job without a row for that day yields `Ok(None)`; an unknown job is
/// an error.
pub fn load_job_stats(
    storage: &dyn Storage,
    namespace: &str,
    job: &str,
    date: NaiveDate,
) -> StorageResult<Option<DailyStatsRecord>> {
    let job_id = storage
        .job_id(namespace, job)?
        .ok_or_else(|| StorageError::JobNotFound {
            namespace: namespace.to_string(),
            job: job.to_string(),
        })?;
    storage.get_daily_stats(job_id, date)
}

/// Daily counters of one job, ready for display
pub struct JobStatsView<'a> {
    pub label: &'a str,
    pub date: NaiveDate,
    pub record: Option<&'a DailyStatsRecord>,
}

impl fmt::Display for JobStatsView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} on {} ===", self.label, self.date)?;

        let Some(record) = self.record else {
            return writeln!(f, "  No runs recorded");
        };

        let stats = &record.stats;
        writeln!(f, "  Runs: {}", record.number_of_runs)?;
        writeln!(f, "  Items scraped: {}", stats.items_scraped)?;
        writeln!(f, "  Retries: {}", stats.retries)?;
        writeln!(
            f,
            "  Enqueued: {} (memory {}, backlog {})",
            stats.enqueued(),
            stats.enqueued_memory,
            stats.enqueued_disk
        )?;
        writeln!(
            f,
            "  Dequeued: memory {}, backlog {}",
            stats.dequeued_memory, stats.dequeued_disk
        )
    }
}

/// Renders the daily counters of one job
pub fn format_job_stats(label: &str, date: NaiveDate, record: Option<&DailyStatsRecord>) -> String {
    JobStatsView {
        label,
        date,
        record,
    }
    .to_string()
}

/// Prints the daily counters of one job to stdout
pub fn print_job_stats(label: &str, date: NaiveDate, record: Option<&DailyStatsRecord>) {
    print!("{}", format_job_stats(label, date, record));
}
