use serde::Deserialize;

/// Main settings structure for a Highrise process
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub jobs: JobsConfig,
    #[serde(default, rename = "engine")]
    pub engines: Vec<EngineConfig>,
}

impl Settings {
    /// Looks up the engine configuration registered under `name`
    pub fn engine(&self, name: &str) -> Option<&EngineConfig> {
        self.engines.iter().find(|engine| engine.name == name)
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file shared by all scheduler processes
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Scheduler loop behavior
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds to sleep between two scheduler ticks
    #[serde(rename = "tick-interval-secs", default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Maximum number of requests resident in memory per job run
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a job lock is honored before it self-expires
    #[serde(rename = "lock-ttl-minutes", default = "default_lock_ttl")]
    pub lock_ttl_minutes: u32,

    /// Whether job runs are serialized across processes
    #[serde(rename = "use-lock", default = "default_use_lock")]
    pub use_lock: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            queue_capacity: default_queue_capacity(),
            lock_ttl_minutes: default_lock_ttl(),
            use_lock: default_use_lock(),
        }
    }
}

fn default_tick_interval() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    500
}

fn default_lock_ttl() -> u32 {
    30
}

fn default_use_lock() -> bool {
    true
}

/// Location of the declarative job definitions
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Root directory laid out as `<namespace>/<job>.toml`
    pub directory: String,
}

/// A command-line crawl engine that jobs can select by name
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Engine tag referenced by job definitions
    pub name: String,

    /// Program to spawn for a run
    pub program: String,

    /// Arguments; `{namespace}` and `{job}` are substituted per run
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra arguments appended for backlog-only runs
    #[serde(rename = "backlog-args", default)]
    pub backlog_args: Vec<String>,

    /// `host:port` of the proxy used by jobs with `use-tor` enabled
    #[serde(rename = "http-proxy", default)]
    pub http_proxy: Option<String>,
}
