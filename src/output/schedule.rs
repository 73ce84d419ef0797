//! Schedule preview
//!
//! Shows what a scheduler process would do with the current job
//! definitions without running anything.

use crate::config::{JobLoadReport, Settings};
use std::fmt;

/// Job definitions as the scheduler will treat them
pub struct SchedulePreview<'a> {
    pub settings: &'a Settings,
    pub report: &'a JobLoadReport,
}

impl fmt::Display for SchedulePreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings = self.settings;
        let report = self.report;

        writeln!(f, "=== Highrise Schedule ===\n")?;
        writeln!(f, "Database: {}", settings.storage.database_path)?;
        writeln!(f, "Job definitions: {}", settings.jobs.directory)?;
        write!(
            f,
            "Tick interval: {}s, queue capacity: {}, lock: ",
            settings.scheduler.tick_interval_secs, settings.scheduler.queue_capacity
        )?;
        if settings.scheduler.use_lock {
            writeln!(f, "{} min ttl", settings.scheduler.lock_ttl_minutes)?;
        } else {
            writeln!(f, "disabled")?;
        }

        writeln!(f, "\nEngines ({}):", settings.engines.len())?;
        for engine in &settings.engines {
            writeln!(f, "  - {}: {} {}", engine.name, engine.program, engine.args.join(" "))?;
        }

        let enabled = report.configs.iter().filter(|c| c.enabled).count();
        writeln!(f, "\nJobs ({} defined, {} enabled):", report.configs.len(), enabled)?;
        for config in &report.configs {
            let state = if config.enabled { "enabled" } else { "disabled" };
            write!(f, "  - {}: {}, ", config.key(), state)?;
            match config.recurrence_minutes {
                Some(minutes) => write!(f, "every {} min", minutes)?,
                None => write!(f, "once")?,
            }
            write!(f, ", engine {}", config.engine)?;
            if settings.engine(&config.engine).is_none() {
                write!(f, " (no such engine)")?;
            }
            writeln!(f)?;
        }

        if !report.rejected.is_empty() {
            writeln!(f, "\nRejected definitions ({}):", report.rejected.len())?;
            for (path, error) in &report.rejected {
                writeln!(f, "  - {}: {}", path.display(), error)?;
            }
        }

        Ok(())
    }
}

/// Renders job definitions the way the scheduler will treat them
pub fn format_schedule(settings: &Settings, report: &JobLoadReport) -> String {
    SchedulePreview { settings, report }.to_string()
}

/// Prints the schedule preview to stdout
pub fn print_schedule(settings: &Settings, report: &JobLoadReport) {
    print!("{}", SchedulePreview { settings, report });
}
