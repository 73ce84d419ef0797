//! Command-line crawl engine runner

use crate::config::{EngineConfig, JobConfig};
use crate::execution::{JobRunner, RunOptions, RunnerError};
use std::process::Command;

/// Environment variable carrying the job's `job-data` table as JSON
pub const JOB_DATA_ENV: &str = "HIGHRISE_JOB_DATA";

/// Environment variable carrying the database path of the backlog
pub const DATABASE_ENV: &str = "HIGHRISE_DATABASE";

/// Environment variable carrying the per-run queue capacity
pub const QUEUE_CAPACITY_ENV: &str = "HIGHRISE_QUEUE_CAPACITY";

/// Runs jobs by spawning the engine's program
///
/// `{namespace}` and `{job}` in the configured arguments are replaced per
/// run. Proxy settings are passed through the child's environment only.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    engine: EngineConfig,
    env: Vec<(String, String)>,
}

impl CommandRunner {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            env: Vec::new(),
        }
    }

    /// Adds an environment variable to every spawned run
    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    /// Builds the command for one run without spawning it
    pub fn build_command(&self, job: &JobConfig, options: RunOptions) -> Result<Command, RunnerError> {
        let mut command = Command::new(&self.engine.program);

        let substitute = |arg: &String| {
            arg.replace("{namespace}", &job.namespace)
                .replace("{job}", &job.job_name)
        };
        command.args(self.engine.args.iter().map(substitute));
        if options.backlog {
            command.args(self.engine.backlog_args.iter().map(substitute));
        }

        if options.use_tor {
            let proxy = self
                .engine
                .http_proxy
                .as_deref()
                .ok_or_else(|| RunnerError::MissingProxy {
                    engine: self.engine.name.clone(),
                })?;
            let proxy_url = format!("http://{}", proxy);
            command.env("http_proxy", &proxy_url);
            command.env("https_proxy", &proxy_url);
        }

        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        command.env("HIGHRISE_NAMESPACE", &job.namespace);
        command.env("HIGHRISE_JOB", &job.job_name);
        if !job.job_data.is_empty() {
            command.env(JOB_DATA_ENV, serde_json::to_string(&job.job_data)?);
        }

        Ok(command)
    }
}

impl JobRunner for CommandRunner {
    fn run(&mut self, job: &JobConfig, options: RunOptions) -> Result<(), RunnerError> {
        let mut command = self.build_command(job, options)?;

        tracing::info!(
            "Starting {}/{} with engine '{}'{}",
            job.namespace,
            job.job_name,
            self.engine.name,
            if options.backlog { " (backlog)" } else { "" }
        );

        let status = command.status()?;
        if !status.success() {
            return Err(RunnerError::ExitStatus {
                job: job.key().to_string(),
                code: status.code(),
            });
        }

        tracing::info!("Finished {}/{}", job.namespace, job.job_name);
        Ok(())
    }
}
