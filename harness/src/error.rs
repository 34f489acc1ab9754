//! Harness error types

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("Invalid event pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{app}] failed to launch {}: {source}", .program.display())]
    Launch {
        app: String,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{app}] worker reported a fatal error: {line}")]
    FatalWorker { app: String, line: String },

    #[error("[{app}] worker exited unexpectedly ({}){}", describe_status(.status), describe_output(.output))]
    UnexpectedExit {
        app: String,
        status: Option<ExitStatus>,
        output: Vec<String>,
    },

    #[error("[{app}] worker did not exit within {grace:?} of the termination signal")]
    TerminationTimeout { app: String, grace: Duration },

    #[error("[{app}] failed to send {signal} to pid {pid}: {source}")]
    Signal {
        app: String,
        pid: u32,
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("[{app}] worker (pid {pid}) is still alive after a forced kill")]
    KillFailed { app: String, pid: u32 },

    #[error("[{app}] no event pattern '{pattern}' is registered")]
    UnknownPattern { app: String, pattern: String },

    #[error("[{app}] event '{pattern}' was not observed within {timeout:?}")]
    EventTimeout {
        app: String,
        pattern: String,
        timeout: Duration,
    },

    #[error("[{app}] supervisor is {state}; event '{pattern}' can no longer be observed")]
    NotRunning {
        app: String,
        pattern: String,
        state: String,
    },

    #[error("[{app}] output watcher panicked: {reason}")]
    WatcherPanicked { app: String, reason: String },

    #[error("Failed to clean up {}: {reason}", .path.display())]
    Cleanup { path: PathBuf, reason: String },

    #[error("Teardown failed for {} supervisor(s): {}", .failures.len(), summarize_failures(.failures))]
    Teardown { failures: Vec<TeardownFailure> },
}

/// One supervisor that could not be stopped cleanly during janitor teardown
#[derive(Debug)]
pub struct TeardownFailure {
    pub app_name: String,
    pub error: HarnessError,
}

pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        HarnessError::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }

    /// Errors that must abort the test that owns the worker
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::Launch { .. } | HarnessError::FatalWorker { .. } | HarnessError::UnexpectedExit { .. }
        )
    }

    /// Name of the worker this error is about, when it concerns a single one
    pub fn app_name(&self) -> Option<&str> {
        match self {
            HarnessError::Launch { app, .. }
            | HarnessError::FatalWorker { app, .. }
            | HarnessError::UnexpectedExit { app, .. }
            | HarnessError::TerminationTimeout { app, .. }
            | HarnessError::Signal { app, .. }
            | HarnessError::KillFailed { app, .. }
            | HarnessError::UnknownPattern { app, .. }
            | HarnessError::EventTimeout { app, .. }
            | HarnessError::NotRunning { app, .. }
            | HarnessError::WatcherPanicked { app, .. } => Some(app),
            _ => None,
        }
    }
}

fn describe_status(status: &Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unknown".to_string(),
    }
}

fn describe_output(output: &[String]) -> String {
    if output.is_empty() {
        return String::new();
    }
    format!("\n| {}", output.join("\n| "))
}

fn summarize_failures(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{}: {}", failure.app_name, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}
