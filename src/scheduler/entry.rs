use crate::config::JobKey;
use chrono::{DateTime, Utc};

/// A pending run of one job
///
/// Entries order by due time first; the remaining fields only make the
/// ordering total.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduleEntry {
    pub due: DateTime<Utc>,
    pub engine: String,
    pub namespace: String,
    pub job: String,
}

impl ScheduleEntry {
    pub fn new(due: DateTime<Utc>, engine: &str, namespace: &str, job: &str) -> Self {
        Self {
            due,
            engine: engine.to_string(),
            namespace: namespace.to_string(),
            job: job.to_string(),
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(&self.namespace, &self.job)
    }
}
