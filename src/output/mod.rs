//! Output module for operator-facing reports
//!
//! This module handles:
//! - The daily item-count threshold report
//! - Per-job daily statistics
//! - The schedule preview built from job definitions

mod schedule;
pub mod stats;

pub use schedule::{format_schedule, print_schedule, SchedulePreview};
pub use stats::{
    format_job_stats, format_threshold_report, load_job_stats, load_threshold_report,
    print_job_stats, print_threshold_report, JobStatsView, ThresholdReport,
};
