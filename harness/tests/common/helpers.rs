//! Test helpers and builder patterns for harness tests
//!
//! This module provides convenient helper functions and builder patterns
//! to reduce test boilerplate and improve maintainability.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use harness::*;
use tempfile::TempDir;

use super::fixtures::TestFixtures;

/// Builder for mock-worker configurations with sensible defaults
pub struct WorkerBuilder {
    builder: ProcessConfigBuilder,
}

impl WorkerBuilder {
    /// A worker that prints nothing and lingers until SIGTERM
    pub fn new(app_name: &str, repo_root: &Path) -> Self {
        Self {
            builder: ProcessConfig::builder(app_name)
                .executable(TestFixtures::mock_worker())
                .repo_root(repo_root),
        }
    }

    /// Print a line (`stderr:` prefix prints to stderr)
    pub fn line(mut self, text: &str) -> Self {
        self.builder = self.builder.arg("--line").arg(text);
        self
    }

    pub fn line_delay(mut self, delay: Duration) -> Self {
        self.builder = self.builder.arg("--line-delay-ms").arg(delay.as_millis().to_string());
        self
    }

    /// Exit with `code` right after the scripted lines
    pub fn exit_code(mut self, code: i32) -> Self {
        self.builder = self.builder.arg("--exit-code").arg(code.to_string());
        self
    }

    pub fn ignore_term(mut self) -> Self {
        self.builder = self.builder.arg("--ignore-term");
        self
    }

    pub fn on_term_line(mut self, text: &str) -> Self {
        self.builder = self.builder.arg("--on-term-line").arg(text);
        self
    }

    /// Have the worker write its pid file and let the supervisor clean it up
    pub fn pid_file(mut self, name: &str) -> Self {
        self.builder = self.builder.pid_file(name).arg("--pid-file").arg(name);
        self
    }

    /// Have the worker abort unless the client config was written
    pub fn client_config(mut self) -> Self {
        self.builder = self
            .builder
            .config_file(TestFixtures::CLIENT_CONF, TestFixtures::CLIENT_CONF_CONTENT)
            .arg("--expect-config")
            .arg(TestFixtures::CLIENT_CONF);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.builder = self.builder.event_pattern(pattern);
        self
    }

    /// Configure the underlying builder with a setup function
    pub fn with<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(ProcessConfigBuilder) -> ProcessConfigBuilder,
    {
        self.builder = setup(self.builder);
        self
    }

    pub fn build(self) -> ProcessConfig {
        self.builder.build().expect("valid mock-worker configuration")
    }
}

/// Signal that was sent and when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentSignal {
    Terminate,
    ForceKill,
}

/// Delivers real signals and records every one of them
#[derive(Debug, Clone, Default)]
pub struct RecordingSignals {
    sent: Arc<Mutex<Vec<(SentSignal, Instant)>>>,
}

impl RecordingSignals {
    pub fn sent(&self) -> Vec<SentSignal> {
        self.sent.lock().unwrap().iter().map(|(signal, _)| *signal).collect()
    }

    pub fn sent_at(&self, signal: SentSignal) -> Option<Instant> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .find(|(sent, _)| *sent == signal)
            .map(|(_, at)| *at)
    }

    fn record(&self, signal: SentSignal) {
        self.sent.lock().unwrap().push((signal, Instant::now()));
    }
}

impl ProcessSignals for RecordingSignals {
    fn terminate(&self, pid: u32) -> io::Result<()> {
        self.record(SentSignal::Terminate);
        UnixSignals.terminate(pid)
    }

    fn force_kill(&self, pid: u32) -> io::Result<()> {
        self.record(SentSignal::ForceKill);
        UnixSignals.force_kill(pid)
    }
}

/// Test helper functions for common test patterns
pub struct TestHelpers;

impl TestHelpers {
    /// Fresh temporary directory plus the repo root inside it
    pub fn repo_root() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("temporary directory");
        let repo_root = dir.path().join("repos");
        (dir, repo_root)
    }

    /// Settings with fast polling and short shutdown timings
    pub fn settings(repo_root: &Path) -> HarnessSettings {
        shared::init_tracing(Some("debug"));
        HarnessSettings::default()
            .with_repo_root(repo_root)
            .with_poll_interval(TestFixtures::POLL_INTERVAL)
            .with_grace_period(TestFixtures::GRACE_PERIOD)
            .with_drain_timeout(TestFixtures::DRAIN_TIMEOUT)
    }

    pub fn waiter() -> EventWaiter {
        EventWaiter::new(TestFixtures::POLL_INTERVAL)
    }

    /// Supervisor whose signals are recorded
    pub fn recorded_supervisor(config: ProcessConfig, settings: &HarnessSettings) -> (ProcessSupervisor, RecordingSignals) {
        let signals = RecordingSignals::default();
        let supervisor = ProcessSupervisor::with_signals(config, settings, Arc::new(signals.clone()))
            .expect("valid supervisor");
        (supervisor, signals)
    }

    /// Poll `condition` until it holds, panicking after the test timeout
    pub async fn wait_until<F>(what: &str, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + TestFixtures::TEST_TIMEOUT;
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Await `pattern` under the test timeout
    pub async fn await_event(supervisor: &ProcessSupervisor, pattern: &str) -> HarnessResult<ObservedEvent> {
        tokio::time::timeout(TestFixtures::TEST_TIMEOUT, Self::waiter().await_event(supervisor, pattern))
            .await
            .expect("event wait hung")
    }
}
