//! Configuration module for Highrise
//!
//! This module handles the process settings file and the declarative job
//! definitions the scheduler reloads on every tick.
//!
//! # Example
//!
//! ```no_run
//! use highrise::config::{load_job_configs, load_settings};
//! use std::path::Path;
//!
//! let settings = load_settings(Path::new("highrise.toml")).unwrap();
//! let report = load_job_configs(Path::new(&settings.jobs.directory)).unwrap();
//! println!("{} jobs defined", report.configs.len());
//! ```

mod job;
mod parser;
mod types;
mod validation;

// Re-export types
pub use job::{JobConfig, JobKey, JobLoadReport, DEFAULT_ENGINE};
pub use types::{EngineConfig, JobsConfig, SchedulerConfig, Settings, StorageConfig};

// Re-export loader functions
pub use job::{load_job_config, load_job_configs};
pub use parser::{compute_config_hash, load_settings, load_settings_with_hash, parse_settings};
