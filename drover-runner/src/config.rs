//! Framework configuration
//!
//! Defines the tunables of job discovery and execution: where jobs are
//! loaded from, default time limits and queue, worker counts, flush and
//! scheduler intervals, and extra sanitizer patterns.

use anyhow::Context;
use drover_jobs::{SanitizerPattern, TimeLimits};
use std::path::PathBuf;
use std::time::Duration;

/// 10 MiB
pub const DEFAULT_FILE_MAX_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the local Lua job tree
    pub jobs_root: PathBuf,

    /// Directory holding one synced repository per child directory
    pub git_root: Option<PathBuf>,

    /// Largest accepted output file, in bytes
    pub file_max_size: u64,

    /// Time limits of jobs that do not declare their own
    pub default_limits: TimeLimits,

    pub default_queue: String,

    /// Extra redaction patterns applied after the built-in ones
    pub sanitizer_patterns: Vec<SanitizerPattern>,

    /// Concurrent executions per queue
    pub workers_per_queue: usize,

    /// How often buffered job logs are written to the store
    pub log_flush_interval: Duration,

    /// How often due scheduled jobs are dispatched
    pub scheduler_interval: Duration,

    /// Discover and sync jobs when the service starts
    pub sync_on_startup: bool,

    /// JSON catalog backing object variables
    pub objects_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs_root: PathBuf::from("./jobs"),
            git_root: None,
            file_max_size: DEFAULT_FILE_MAX_SIZE,
            default_limits: TimeLimits::from_secs(300, 600),
            default_queue: "default".to_string(),
            sanitizer_patterns: Vec::new(),
            workers_per_queue: 4,
            log_flush_interval: Duration::from_secs(2),
            scheduler_interval: Duration::from_secs(15),
            sync_on_startup: true,
            objects_file: None,
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Recognized variables (all optional):
    /// - DROVER_JOBS_ROOT (default: ./jobs)
    /// - DROVER_GIT_ROOT
    /// - DROVER_JOB_CREATE_FILE_MAX_SIZE (bytes, default: 10 MiB)
    /// - DROVER_SOFT_TIME_LIMIT (seconds, default: 300)
    /// - DROVER_HARD_TIME_LIMIT (seconds, default: 600)
    /// - DROVER_DEFAULT_QUEUE (default: default)
    /// - DROVER_SANITIZER_PATTERNS (JSON array of [pattern, replacement])
    /// - DROVER_WORKERS_PER_QUEUE (default: 4)
    /// - DROVER_LOG_FLUSH_INTERVAL (seconds, default: 2)
    /// - DROVER_SCHEDULER_INTERVAL (seconds, default: 15)
    /// - DROVER_SYNC_ON_STARTUP (default: true)
    /// - DROVER_OBJECTS_FILE
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Config::default();

        let jobs_root = var("DROVER_JOBS_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.jobs_root);
        let git_root = var("DROVER_GIT_ROOT")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let file_max_size = parse(&var, "DROVER_JOB_CREATE_FILE_MAX_SIZE")?
            .unwrap_or(defaults.file_max_size);

        let soft = parse::<u64>(&var, "DROVER_SOFT_TIME_LIMIT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_limits.soft);
        let hard = parse::<u64>(&var, "DROVER_HARD_TIME_LIMIT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_limits.hard);

        let default_queue = var("DROVER_DEFAULT_QUEUE").unwrap_or(defaults.default_queue);

        let sanitizer_patterns = match var("DROVER_SANITIZER_PATTERNS") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .context("DROVER_SANITIZER_PATTERNS must be a JSON array of [pattern, replacement]")?,
            _ => Vec::new(),
        };

        let workers_per_queue =
            parse(&var, "DROVER_WORKERS_PER_QUEUE")?.unwrap_or(defaults.workers_per_queue);
        let log_flush_interval = parse(&var, "DROVER_LOG_FLUSH_INTERVAL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.log_flush_interval);
        let scheduler_interval = parse(&var, "DROVER_SCHEDULER_INTERVAL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.scheduler_interval);
        let sync_on_startup =
            parse(&var, "DROVER_SYNC_ON_STARTUP")?.unwrap_or(defaults.sync_on_startup);
        let objects_file = var("DROVER_OBJECTS_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            jobs_root,
            git_root,
            file_max_size,
            default_limits: TimeLimits { soft, hard },
            default_queue,
            sanitizer_patterns,
            workers_per_queue,
            log_flush_interval,
            scheduler_interval,
            sync_on_startup,
            objects_file,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_limits.soft.is_zero() {
            anyhow::bail!("soft time limit must be greater than 0");
        }

        if self.default_limits.hard <= self.default_limits.soft {
            anyhow::bail!(
                "hard time limit ({}s) must be greater than the soft time limit ({}s)",
                self.default_limits.hard.as_secs(),
                self.default_limits.soft.as_secs()
            );
        }

        if self.default_queue.is_empty() {
            anyhow::bail!("default_queue cannot be empty");
        }

        if self.workers_per_queue == 0 {
            anyhow::bail!("workers_per_queue must be greater than 0");
        }

        if self.log_flush_interval.is_zero() {
            anyhow::bail!("log_flush_interval must be greater than 0");
        }

        if self.scheduler_interval.is_zero() {
            anyhow::bail!("scheduler_interval must be greater than 0");
        }

        drover_jobs::Sanitizer::new(&self.sanitizer_patterns)
            .context("invalid sanitizer pattern")?;

        Ok(())
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", raw, key, e)),
    }
}
