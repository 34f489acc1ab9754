//! Harness Settings
//!
//! Session-wide knobs shared by every supervisor: where working directories
//! live, where the worker executables are, and the shutdown/poll timings.
//! Values come from defaults, a `.env` file, then the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::builder::ProcessConfigBuilder;
use crate::error::{HarnessError, HarnessResult};

pub const DEFAULT_REPO_ROOT: &str = "repos";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_OUTPUT_TAIL_LINES: usize = 256;
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_REPO_ROOT: &str = "HARNESS_REPO_ROOT";
pub const ENV_BUILD_DIR: &str = "WORKER_BUILD_DIR";
pub const ENV_GRACE_PERIOD_SECS: &str = "HARNESS_GRACE_PERIOD_SECS";
pub const ENV_POLL_INTERVAL_MS: &str = "HARNESS_POLL_INTERVAL_MS";
pub const ENV_DRAIN_TIMEOUT_MS: &str = "HARNESS_DRAIN_TIMEOUT_MS";
pub const ENV_OUTPUT_TAIL_LINES: &str = "HARNESS_OUTPUT_TAIL_LINES";
pub const ENV_PROCESS_TIMEOUT_SECS: &str = "HARNESS_PROCESS_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "HARNESS_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessSettings {
    /// Shared directory holding one working directory per worker
    pub repo_root: PathBuf,
    /// Directory containing the worker executables
    pub build_dir: Option<PathBuf>,
    /// How long a worker gets to exit after the termination signal
    pub grace_period: Duration,
    /// Delay between two registry checks while waiting for an event
    pub poll_interval: Duration,
    /// Upper bound on collecting leftover output after a worker exits
    pub drain_timeout: Duration,
    /// Number of recent output lines kept for diagnostics
    pub output_tail_lines: usize,
    /// Default advisory timeout for new worker configurations
    pub process_timeout: Duration,
    pub log_level: String,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from(DEFAULT_REPO_ROOT),
            build_dir: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            output_tail_lines: DEFAULT_OUTPUT_TAIL_LINES,
            process_timeout: DEFAULT_PROCESS_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl HarnessSettings {
    /// Load settings from a `.env` file (if present) and the process environment
    pub fn from_env() -> HarnessResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(root) = lookup(ENV_REPO_ROOT) {
            settings.repo_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup(ENV_BUILD_DIR) {
            settings.build_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_GRACE_PERIOD_SECS)? {
            settings.grace_period = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_POLL_INTERVAL_MS)? {
            settings.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_DRAIN_TIMEOUT_MS)? {
            settings.drain_timeout = Duration::from_millis(ms);
        }
        if let Some(lines) = parse_var::<usize, _>(&lookup, ENV_OUTPUT_TAIL_LINES)? {
            settings.output_tail_lines = lines;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_PROCESS_TIMEOUT_SECS)? {
            settings.process_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            settings.log_level = level;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn with_repo_root<P: Into<PathBuf>>(mut self, repo_root: P) -> Self {
        self.repo_root = repo_root.into();
        self
    }

    pub fn with_build_dir<P: Into<PathBuf>>(mut self, build_dir: P) -> Self {
        self.build_dir = Some(build_dir.into());
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn with_output_tail_lines(mut self, lines: usize) -> Self {
        self.output_tail_lines = lines;
        self
    }

    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.poll_interval.is_zero() {
            return Err(HarnessError::config("poll_interval", "must be greater than zero"));
        }
        if self.output_tail_lines == 0 {
            return Err(HarnessError::config("output_tail_lines", "must keep at least one line"));
        }
        if self.repo_root.as_os_str().is_empty() {
            return Err(HarnessError::config("repo_root", "must not be empty"));
        }
        Ok(())
    }

    /// Start a worker configuration rooted in this session's repo root
    pub fn process(&self, app_name: impl Into<String>) -> ProcessConfigBuilder {
        ProcessConfigBuilder::new(app_name)
            .repo_root(self.repo_root.clone())
            .timeout(self.process_timeout)
    }

    /// Path of a worker executable inside the build directory
    pub fn worker_executable(&self, name: &str) -> HarnessResult<PathBuf> {
        self.build_dir
            .as_ref()
            .map(|dir| dir.join(name))
            .ok_or_else(|| HarnessError::config("build_dir", format!("{ENV_BUILD_DIR} is not set")))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> HarnessResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| HarnessError::config(key, format!("invalid value '{raw}': {e}"))),
        None => Ok(None),
    }
}
