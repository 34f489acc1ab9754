//! Output Watcher
//!
//! Background task that consumes a worker's combined output: every line is
//! kept in the tail, forwarded to the log, checked for the fatal marker and
//! matched against the event registry. The task ends when the worker's
//! output ends, when a fatal line is seen, or when the supervisor cancels it.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use shared::{worker_debug, worker_error, worker_info, worker_output};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::output::{OutputLine, OutputTail};
use super::registry::EventRegistry;
use crate::error::HarnessError;

pub type OutputReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<OutputLine>>>;

/// Why a watcher stopped on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchFailure {
    /// A line contained the fatal marker
    Fatal { line: String },
    /// The worker exited while nobody asked it to
    UnexpectedExit {
        status: Option<ExitStatus>,
        output: Vec<String>,
    },
}

impl WatchFailure {
    pub fn into_error(self, app: &str) -> HarnessError {
        match self {
            WatchFailure::Fatal { line } => HarnessError::FatalWorker {
                app: app.to_string(),
                line,
            },
            WatchFailure::UnexpectedExit { status, output } => HarnessError::UnexpectedExit {
                app: app.to_string(),
                status,
                output,
            },
        }
    }
}

/// Shared slot holding the first failure a watcher reported
#[derive(Debug, Clone, Default)]
pub struct FailureSlot {
    inner: Arc<Mutex<Option<WatchFailure>>>,
}

impl FailureSlot {
    /// Keeps the first failure; later ones are dropped
    pub fn record(&self, failure: WatchFailure) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(failure);
        }
    }

    pub fn get(&self) -> Option<WatchFailure> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Non-blocking view of whether a worker is still expected to be running
#[derive(Debug, Clone)]
pub struct Liveness {
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    stopping: Arc<AtomicBool>,
}

impl Liveness {
    pub fn new(exit_rx: watch::Receiver<Option<ExitStatus>>, stopping: Arc<AtomicBool>) -> Self {
        Self { exit_rx, stopping }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// Set once the supervisor has started shutting the worker down
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Fails when the worker is gone although nobody asked it to stop
    pub fn check(&self, tail: &OutputTail) -> Result<(), WatchFailure> {
        match self.exit_status() {
            Some(status) if !self.is_stopping() => Err(WatchFailure::UnexpectedExit {
                status: Some(status),
                output: tail.snapshot(),
            }),
            _ => Ok(()),
        }
    }

    /// Wait for the exit status; `None` if it can never be known
    pub async fn wait_for_exit(&mut self) -> Option<ExitStatus> {
        self.exit_rx
            .wait_for(|status| status.is_some())
            .await
            .ok()
            .and_then(|status| *status)
    }

    /// `false` once the exit monitor is gone
    async fn changed(&mut self) -> bool {
        self.exit_rx.changed().await.is_ok()
    }
}

pub struct OutputWatcher {
    app: String,
    registry: EventRegistry,
    fatal_marker: String,
    tail: OutputTail,
    failure: FailureSlot,
    drain_timeout: Duration,
}

impl OutputWatcher {
    pub fn new(
        app: impl Into<String>,
        registry: EventRegistry,
        fatal_marker: impl Into<String>,
        tail: OutputTail,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            app: app.into(),
            registry,
            fatal_marker: fatal_marker.into(),
            tail,
            failure: FailureSlot::default(),
            drain_timeout,
        }
    }

    pub fn failure_slot(&self) -> FailureSlot {
        self.failure.clone()
    }

    /// Start watching on a background task.
    ///
    /// The task holds the output receiver until it finishes or is aborted,
    /// after which the supervisor can take it over for a final drain.
    pub fn spawn(self, lines: OutputReceiver, liveness: Liveness) -> JoinHandle<Result<(), WatchFailure>> {
        tokio::spawn(async move {
            let result = self.run(lines, liveness).await;
            if let Err(failure) = &result {
                self.failure.record(failure.clone());
            }
            result
        })
    }

    async fn run(&self, lines: OutputReceiver, mut liveness: Liveness) -> Result<(), WatchFailure> {
        let mut lines = lines.lock().await;
        let mut line_number: u64 = 0;

        worker_debug!(self.app, "👀 Watching output for {} pattern(s)", self.registry.len());

        // Read until the output ends or the worker is gone
        while !liveness.has_exited() {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        line_number += 1;
                        self.handle_line(line, line_number)?;
                    }
                    None => break,
                },
                open = liveness.changed() => {
                    if !open {
                        break;
                    }
                }
            }
        }

        // Whatever the worker printed right before exiting is still relevant
        let drain = async {
            while let Some(line) = lines.recv().await {
                line_number += 1;
                self.handle_line(line, line_number)?;
            }
            Ok::<(), WatchFailure>(())
        };
        match tokio::time::timeout(self.drain_timeout, drain).await {
            Ok(result) => result?,
            Err(_) => {
                worker_debug!(self.app, "⏰ Output still open {:?} after exit, giving up", self.drain_timeout);
            }
        }

        let status = liveness.wait_for_exit().await;
        if liveness.is_stopping() {
            return Ok(());
        }

        worker_error!(
            self.app,
            "💀 Worker exited unexpectedly ({})",
            status.map(|s| s.to_string()).unwrap_or_else(|| "status unknown".to_string())
        );
        Err(WatchFailure::UnexpectedExit {
            status,
            output: self.tail.snapshot(),
        })
    }

    fn handle_line(&self, line: OutputLine, line_number: u64) -> Result<(), WatchFailure> {
        self.tail.push(line.text.clone());
        worker_output!(self.app, line.source, line.text);

        if line.text.contains(&self.fatal_marker) {
            worker_error!(self.app, "🔥 Fatal marker '{}' in output: {}", self.fatal_marker, line.text);
            return Err(WatchFailure::Fatal { line: line.text });
        }

        for pattern in self.registry.observe(&line.text, line_number) {
            worker_info!(self.app, "✅ Event '{}' observed at line {}", pattern, line_number);
        }

        Ok(())
    }
}
