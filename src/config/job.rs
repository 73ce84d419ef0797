//! Declarative job definitions
//!
//! Each job lives in its own TOML file at `<root>/<namespace>/<job>.toml`.
//! The namespace and job name are taken from the path; the file carries the
//! scheduling fields and an opaque `job-data` table handed to the engine.

use crate::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Engine tag used when a definition does not name one
pub const DEFAULT_ENGINE: &str = "custom";

/// Identity of a job: (namespace, job name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub namespace: String,
    pub job: String,
}

impl JobKey {
    pub fn new(namespace: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            job: job.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.job)
    }
}

/// Fields as they appear in a job definition file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct JobDefinition {
    namespace: Option<String>,
    job: Option<String>,
    recurrence_minutes: Option<u32>,
    #[serde(default)]
    enabled: bool,
    engine: Option<String>,
    #[serde(default)]
    use_tor: bool,
    #[serde(default)]
    items_daily_threshold: u32,
    #[serde(default)]
    job_data: toml::Table,
}

/// Declarative description of one job
///
/// Equality and hashing cover the fields that affect scheduling
/// (identity, recurrence, enabled flag, engine and proxy use). The item
/// threshold and `job_data` are carried along but never trigger an
/// immediate re-run on their own.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub namespace: String,
    pub job_name: String,
    /// `None` means run-once: never rescheduled automatically
    pub recurrence_minutes: Option<u32>,
    pub enabled: bool,
    pub engine: String,
    pub use_tor: bool,
    pub items_daily_threshold: u32,
    pub job_data: toml::Table,
}

impl JobConfig {
    /// Creates a disabled, run-once config on the default engine
    pub fn new(namespace: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            job_name: job_name.into(),
            recurrence_minutes: None,
            enabled: false,
            engine: DEFAULT_ENGINE.to_string(),
            use_tor: false,
            items_daily_threshold: 0,
            job_data: toml::Table::new(),
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(&self.namespace, &self.job_name)
    }

    /// Parses a job definition from TOML text
    ///
    /// `namespace` and `job` fill in identity fields the file does not set.
    /// A definition that still lacks either is rejected.
    pub fn from_toml(
        content: &str,
        namespace: Option<&str>,
        job: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let definition: JobDefinition = toml::from_str(content)?;

        let namespace = namespace
            .map(str::to_string)
            .or(definition.namespace)
            .ok_or(ConfigError::MissingField { field: "namespace" })?;
        let job_name = job
            .map(str::to_string)
            .or(definition.job)
            .ok_or(ConfigError::MissingField { field: "job" })?;

        let config = Self {
            namespace,
            job_name,
            recurrence_minutes: definition.recurrence_minutes,
            enabled: definition.enabled,
            engine: definition
                .engine
                .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            use_tor: definition.use_tor,
            items_daily_threshold: definition.items_daily_threshold,
            job_data: definition.job_data,
        };

        validate_job(&config)?;
        Ok(config)
    }
}

impl PartialEq for JobConfig {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.job_name == other.job_name
            && self.recurrence_minutes == other.recurrence_minutes
            && self.enabled == other.enabled
            && self.engine == other.engine
            && self.use_tor == other.use_tor
    }
}

impl Eq for JobConfig {}

impl Hash for JobConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.job_name.hash(state);
        self.recurrence_minutes.hash(state);
        self.enabled.hash(state);
        self.engine.hash(state);
        self.use_tor.hash(state);
    }
}

/// Outcome of loading a directory of job definitions
#[derive(Debug, Default)]
pub struct JobLoadReport {
    /// Definitions that parsed and validated
    pub configs: Vec<JobConfig>,

    /// Definitions rejected at load time, with the reason
    pub rejected: Vec<(PathBuf, ConfigError)>,
}

/// Loads a single job definition file for the given identity
pub fn load_job_config(path: &Path, namespace: &str, job: &str) -> Result<JobConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    JobConfig::from_toml(&content, Some(namespace), Some(job))
}

/// Loads every job definition below `root`
///
/// Only `<root>/<namespace>/<job>.toml` files are considered. A malformed
/// definition is reported in [`JobLoadReport::rejected`] and never reaches
/// the schedule; an unreadable root directory is an error.
pub fn load_job_configs(root: &Path) -> Result<JobLoadReport, ConfigError> {
    let mut report = JobLoadReport::default();

    let mut namespaces: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    namespaces.sort();

    for namespace_dir in namespaces {
        let Some(namespace) = file_name(&namespace_dir) else {
            continue;
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(&namespace_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        files.sort();

        for path in files {
            let Some(job) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                report.rejected.push((
                    path.clone(),
                    ConfigError::InvalidJobPath(path.display().to_string()),
                ));
                continue;
            };

            match load_job_config(&path, &namespace, &job) {
                Ok(config) => report.configs.push(config),
                Err(e) => report.rejected.push((path, e)),
            }
        }
    }

    Ok(report)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn validate_job(config: &JobConfig) -> Result<(), ConfigError> {
    validate_identifier("namespace", &config.namespace)?;
    validate_identifier("job", &config.job_name)?;

    if config.engine.is_empty() {
        return Err(ConfigError::Validation(format!(
            "engine of job {}/{} cannot be empty",
            config.namespace, config.job_name
        )));
    }

    if config.recurrence_minutes == Some(0) {
        return Err(ConfigError::Validation(format!(
            "recurrence-minutes of job {}/{} must be >= 1",
            config.namespace, config.job_name
        )));
    }

    Ok(())
}

/// Identifiers end up in file paths and process arguments
fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", field)));
    }

    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::Validation(format!(
            "{} must contain only alphanumeric characters, '-', '_' or '.', got '{}'",
            field, value
        )));
    }

    Ok(())
}
