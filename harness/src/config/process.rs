//! Worker Process Configuration
//!
//! Immutable description of one worker instance and the command line it is
//! launched with.

use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use regex::Regex;

use super::builder::ProcessConfigBuilder;
use crate::error::{HarnessError, HarnessResult};

/// A file written into the worker's working directory before launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedFile {
    /// Path relative to the working directory
    pub path: PathBuf,
    pub content: String,
}

impl SeedFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub(crate) app_name: String,
    pub(crate) executable: PathBuf,
    pub(crate) extra_args: Vec<String>,
    pub(crate) timeout: Duration,
    pub(crate) event_patterns: Vec<String>,
    pub(crate) repo_root: PathBuf,
    pub(crate) config_file: Option<SeedFile>,
    pub(crate) seed_files: Vec<SeedFile>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) pid_file: Option<String>,
    pub(crate) fatal_marker: String,
}

impl ProcessConfig {
    /// Create a new builder for the worker called `app_name`
    pub fn builder(app_name: impl Into<String>) -> ProcessConfigBuilder {
        ProcessConfigBuilder::new(app_name)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    /// Advisory upper bound on how long a test is willing to wait for this worker
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn event_patterns(&self) -> &[String] {
        &self.event_patterns
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config_file(&self) -> Option<&SeedFile> {
        self.config_file.as_ref()
    }

    pub fn seed_files(&self) -> &[SeedFile] {
        &self.seed_files
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn fatal_marker(&self) -> &str {
        &self.fatal_marker
    }

    /// Each worker gets its own directory under the shared repo root
    pub fn working_directory(&self) -> PathBuf {
        self.repo_root.join(&self.app_name)
    }

    pub fn pid_file_path(&self) -> Option<PathBuf> {
        self.pid_file
            .as_ref()
            .map(|name| self.working_directory().join(name))
    }

    /// `[executable, "--repo", working_directory] + extra_args`
    pub fn command_line(&self) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(3 + self.extra_args.len());
        argv.push(self.executable.clone().into_os_string());
        argv.push(OsString::from("--repo"));
        argv.push(self.working_directory().into_os_string());
        argv.extend(self.extra_args.iter().map(OsString::from));
        argv
    }

    /// Human readable rendering of [`command_line`](Self::command_line)
    pub fn display_command(&self) -> String {
        self.command_line()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Check this configuration is usable
    pub fn validate(&self) -> HarnessResult<()> {
        if !is_single_component(Path::new(&self.app_name)) {
            return Err(HarnessError::config(
                "app_name",
                format!("'{}' must be a single, non-empty directory name", self.app_name),
            ));
        }

        if self.executable.as_os_str().is_empty() {
            return Err(HarnessError::config("executable", "must not be empty"));
        }

        if self.fatal_marker.is_empty() {
            return Err(HarnessError::config("fatal_marker", "must not be empty"));
        }

        let mut seen = HashSet::new();
        for pattern in &self.event_patterns {
            if !seen.insert(pattern.as_str()) {
                return Err(HarnessError::config(
                    "event_patterns",
                    format!("pattern '{pattern}' is listed more than once"),
                ));
            }
            Regex::new(pattern).map_err(|source| HarnessError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }

        for seed in self.config_file.iter().chain(self.seed_files.iter()) {
            if !is_contained_relative(&seed.path) {
                return Err(HarnessError::config(
                    "seed_files",
                    format!("'{}' must be a relative path inside the working directory", seed.path.display()),
                ));
            }
        }

        if let Some(pid_file) = &self.pid_file {
            if !is_single_component(Path::new(pid_file)) {
                return Err(HarnessError::config(
                    "pid_file",
                    format!("'{pid_file}' must be a plain file name"),
                ));
            }
        }

        Ok(())
    }
}

fn is_single_component(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_contained_relative(path: &Path) -> bool {
    let mut components = path.components().peekable();
    components.peek().is_some() && components.all(|component| matches!(component, Component::Normal(_)))
}
