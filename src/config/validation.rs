use crate::config::types::{EngineConfig, JobsConfig, SchedulerConfig, Settings, StorageConfig};
use crate::ConfigError;
use std::collections::HashSet;

/// Validates the entire settings file
pub fn validate(settings: &Settings) -> Result<(), ConfigError> {
    validate_storage_config(&settings.storage)?;
    validate_scheduler_config(&settings.scheduler)?;
    validate_jobs_config(&settings.jobs)?;
    validate_engines(&settings.engines)?;
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates scheduler configuration
///
/// A queue capacity of 0 is allowed: every admitted request then goes
/// straight to the durable backlog.
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.tick_interval_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "tick_interval_secs must be >= 1, got {}",
            config.tick_interval_secs
        )));
    }

    if config.lock_ttl_minutes < 1 {
        return Err(ConfigError::Validation(format!(
            "lock_ttl_minutes must be >= 1, got {}",
            config.lock_ttl_minutes
        )));
    }

    Ok(())
}

fn validate_jobs_config(config: &JobsConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "jobs directory cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_engines(engines: &[EngineConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for engine in engines {
        if engine.name.is_empty() {
            return Err(ConfigError::Validation(
                "engine name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(engine.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "engine '{}' is defined more than once",
                engine.name
            )));
        }

        if engine.program.is_empty() {
            return Err(ConfigError::Validation(format!(
                "engine '{}' must name a program",
                engine.name
            )));
        }

        if let Some(proxy) = &engine.http_proxy {
            validate_proxy(&engine.name, proxy)?;
        }
    }

    Ok(())
}

/// Proxies are given as `host:port`, without a scheme
fn validate_proxy(engine: &str, proxy: &str) -> Result<(), ConfigError> {
    let valid = match proxy.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && !host.contains("://") && port.parse::<u16>().is_ok(),
        None => false,
    };

    if !valid {
        return Err(ConfigError::Validation(format!(
            "http-proxy of engine '{}' must be host:port, got '{}'",
            engine, proxy
        )));
    }

    Ok(())
}
