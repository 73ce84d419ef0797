use crate::config::{load_job_configs, JobConfig, JobLoadReport};
use crate::ConfigResult;
use std::path::{Path, PathBuf};

/// Supplies the full current list of job definitions
///
/// Every call is authoritative: jobs missing from the result are treated
/// as removed.
pub trait JobSource {
    fn load(&mut self) -> ConfigResult<JobLoadReport>;
}

/// Job definitions read from `<root>/<namespace>/<job>.toml`
#[derive(Debug, Clone)]
pub struct DirectoryJobSource {
    root: PathBuf,
}

impl DirectoryJobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl JobSource for DirectoryJobSource {
    fn load(&mut self) -> ConfigResult<JobLoadReport> {
        load_job_configs(&self.root)
    }
}

/// A fixed, replaceable list of definitions
#[derive(Debug, Clone, Default)]
pub struct StaticJobSource {
    pub configs: Vec<JobConfig>,
}

impl StaticJobSource {
    pub fn new(configs: Vec<JobConfig>) -> Self {
        Self { configs }
    }
}

impl JobSource for StaticJobSource {
    fn load(&mut self) -> ConfigResult<JobLoadReport> {
        Ok(JobLoadReport {
            configs: self.configs.clone(),
            rejected: Vec::new(),
        })
    }
}
