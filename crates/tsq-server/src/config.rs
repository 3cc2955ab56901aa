//! Configuration for tsqd
//!
//! Loaded from config.yaml when present. Environment variables override the file:
//! `TSQ_TICK_INTERVAL`, `TSQ_EXECUTOR`, `TSQ_RUN_TIMEOUT` and the logging variables
//! `RUST_LOG`, `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tsq_functions::{MemoryStorage, Point};
use tsq_ir::{Duration, Time};
use tsq_plan::Resources;
use tsq_task::Id;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Iterator based query service driven from a spawned task.
    Sync,
    Async,
}

impl std::str::FromStr for ExecutorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(ExecutorKind::Sync),
            "async" => Ok(ExecutorKind::Async),
            other => Err(ConfigError::Invalid(format!(
                "executor must be sync or async, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub executor: ExecutorKind,
    /// Runs still going after this long are canceled.
    pub run_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            executor: ExecutorKind::Async,
            run_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub concurrency_quota: usize,
    /// Zero means unlimited.
    pub memory_bytes_quota: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let r = Resources::default();
        Self {
            concurrency_quota: r.concurrency_quota,
            memory_bytes_quota: r.memory_bytes_quota,
        }
    }
}

impl ExecutionConfig {
    pub fn resources(&self) -> Resources {
        Resources {
            concurrency_quota: self.concurrency_quota,
            memory_bytes_quota: self.memory_bytes_quota,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific directives
    pub level: String,

    /// pretty, json, compact
    pub format: String,

    /// stdout, file, both
    pub output: String,

    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// A task created at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub org: Id,
    pub user: Id,
    pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointConfig {
    pub measurement: String,
    pub field: String,
    pub time: Time,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Points loaded into the in-memory storage at startup, by bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub buckets: BTreeMap<String, Vec<PointConfig>>,
}

impl StorageConfig {
    pub fn build(&self) -> MemoryStorage {
        let storage = MemoryStorage::new();
        for (bucket, points) in &self.buckets {
            storage.write(
                bucket,
                points.iter().map(|p| {
                    p.tags.iter().fold(
                        Point::new(&p.measurement, &p.field, p.time, p.value),
                        |point, (k, v)| point.tag(k, v),
                    )
                }),
            );
        }
        storage
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub tasks: Vec<TaskConfig>,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.with_env_overrides()
    }

    /// Like [`Config::load`], but starts from the defaults when `path` does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Config::default().with_env_overrides()
        }
    }

    fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(tick) = std::env::var("TSQ_TICK_INTERVAL") {
            self.scheduler.tick_interval = parse_duration("TSQ_TICK_INTERVAL", &tick)?;
        }
        if let Ok(executor) = std::env::var("TSQ_EXECUTOR") {
            self.scheduler.executor = executor.parse()?;
        }
        if let Ok(timeout) = std::env::var("TSQ_RUN_TIMEOUT") {
            self.scheduler.run_timeout = parse_duration("TSQ_RUN_TIMEOUT", &timeout)?;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval.nanos() <= 0 {
            return Err(ConfigError::Invalid("tick_interval must be positive".into()));
        }
        if self.scheduler.run_timeout.nanos() <= 0 {
            return Err(ConfigError::Invalid("run_timeout must be positive".into()));
        }
        if self.execution.concurrency_quota == 0 {
            return Err(ConfigError::Invalid("concurrency_quota must be at least 1".into()));
        }
        Ok(())
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}

fn parse_duration(var: &str, s: &str) -> Result<Duration, ConfigError> {
    s.parse()
        .map_err(|e| ConfigError::Invalid(format!("{var}: {e}")))
}
