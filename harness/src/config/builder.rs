//! Process Configuration Builder
//!
//! Provides a fluent builder for constructing worker configurations

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::patterns::FATAL_MARKER;
use super::process::{ProcessConfig, SeedFile};
use super::settings::{DEFAULT_PROCESS_TIMEOUT, DEFAULT_REPO_ROOT};
use crate::error::HarnessResult;

pub struct ProcessConfigBuilder {
    config: ProcessConfig,
}

impl ProcessConfigBuilder {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            config: ProcessConfig {
                app_name: app_name.into(),
                executable: PathBuf::new(),
                extra_args: Vec::new(),
                timeout: DEFAULT_PROCESS_TIMEOUT,
                event_patterns: Vec::new(),
                repo_root: PathBuf::from(DEFAULT_REPO_ROOT),
                config_file: None,
                seed_files: Vec::new(),
                env: BTreeMap::new(),
                pid_file: None,
                fatal_marker: FATAL_MARKER.to_string(),
            },
        }
    }

    /// Set the worker executable
    pub fn executable<P: Into<PathBuf>>(mut self, executable: P) -> Self {
        self.config.executable = executable.into();
        self
    }

    /// Append one argument after `--repo <dir>`
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.config.extra_args.push(arg.into());
        self
    }

    /// Append several arguments after `--repo <dir>`
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(mut self, args: I) -> Self {
        self.config
            .extra_args
            .extend(args.into_iter().map(|arg| arg.to_string()));
        self
    }

    /// Set the advisory timeout for this worker
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Add a pattern to watch for in the worker's output
    pub fn event_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.config.event_patterns.push(pattern.into());
        self
    }

    /// Add several patterns to watch for, keeping their order
    pub fn event_patterns<S: ToString, I: IntoIterator<Item = S>>(mut self, patterns: I) -> Self {
        self.config
            .event_patterns
            .extend(patterns.into_iter().map(|pattern| pattern.to_string()));
        self
    }

    /// Patterns added so far
    pub fn patterns(&self) -> &[String] {
        &self.config.event_patterns
    }

    /// Set the shared directory that holds every worker's working directory
    pub fn repo_root<P: Into<PathBuf>>(mut self, repo_root: P) -> Self {
        self.config.repo_root = repo_root.into();
        self
    }

    /// Set the config file the worker reads at startup
    pub fn config_file<P: Into<PathBuf>, S: Into<String>>(mut self, name: P, content: S) -> Self {
        self.config.config_file = Some(SeedFile::new(name, content));
        self
    }

    /// Add another file to write into the working directory before launch
    pub fn seed_file<P: Into<PathBuf>, S: Into<String>>(mut self, path: P, content: S) -> Self {
        self.config.seed_files.push(SeedFile::new(path, content));
        self
    }

    /// Set an environment variable for the worker
    pub fn env<K: ToString, V: ToString>(mut self, key: K, value: V) -> Self {
        self.config.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Name of the pid file the worker writes into its working directory
    pub fn pid_file<S: Into<String>>(mut self, name: S) -> Self {
        self.config.pid_file = Some(name.into());
        self
    }

    /// Override the literal marker that flags a fatal worker line
    pub fn fatal_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.config.fatal_marker = marker.into();
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> HarnessResult<ProcessConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
