//! Process Supervisor
//!
//! Owns one worker process from working-directory setup to termination.
//! A supervisor is a cheap clonable handle; every clone drives the same
//! worker.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serde::Serialize;
use shared::logging::{log_shutdown, log_startup};
use shared::{worker_debug, worker_info, worker_output, worker_warn};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::output::{spawn_output_readers, OutputTail};
use super::registry::EventRegistry;
use super::signals::{ProcessSignals, UnixSignals};
use super::watcher::{FailureSlot, Liveness, OutputReceiver, OutputWatcher, WatchFailure};
use crate::config::{HarnessSettings, ProcessConfig};
use crate::error::{HarnessError, HarnessResult};

/// How long to wait for the kernel to reap a worker after SIGKILL
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            SupervisorState::NotStarted => "not started",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
        };
        write!(f, "{state}")
    }
}

/// Handles that only exist while the worker runs
struct RunningProcess {
    watcher: JoinHandle<Result<(), WatchFailure>>,
    lines: OutputReceiver,
}

/// Facts about the launched worker, fixed once it is spawned
struct LaunchedProcess {
    pid: u32,
    liveness: Liveness,
    failure: FailureSlot,
}

struct Inner {
    config: ProcessConfig,
    grace_period: Duration,
    drain_timeout: Duration,
    events: EventRegistry,
    tail: OutputTail,
    term_signal_sent: Arc<AtomicBool>,
    signals: Arc<dyn ProcessSignals>,
    state: Mutex<SupervisorState>,
    process: tokio::sync::Mutex<Option<RunningProcess>>,
    launched: OnceLock<LaunchedProcess>,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("app_name", &self.app_name())
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

impl ProcessSupervisor {
    pub fn new(config: ProcessConfig, settings: &HarnessSettings) -> HarnessResult<Self> {
        Self::with_signals(config, settings, Arc::new(UnixSignals))
    }

    /// Create a supervisor that delivers termination signals through `signals`
    pub fn with_signals(
        config: ProcessConfig,
        settings: &HarnessSettings,
        signals: Arc<dyn ProcessSignals>,
    ) -> HarnessResult<Self> {
        config.validate()?;
        let events = EventRegistry::new(config.event_patterns())?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                grace_period: settings.grace_period,
                drain_timeout: settings.drain_timeout,
                events,
                tail: OutputTail::new(settings.output_tail_lines),
                term_signal_sent: Arc::new(AtomicBool::new(false)),
                signals,
                state: Mutex::new(SupervisorState::NotStarted),
                process: tokio::sync::Mutex::new(None),
                launched: OnceLock::new(),
            }),
        })
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.inner.config
    }

    pub fn app_name(&self) -> &str {
        self.inner.config.app_name()
    }

    pub fn working_directory(&self) -> PathBuf {
        self.inner.config.working_directory()
    }

    /// Event registry of this worker; only the output watcher writes to it
    pub fn events(&self) -> &EventRegistry {
        &self.inner.events
    }

    pub fn state(&self) -> SupervisorState {
        *self.lock_state()
    }

    pub fn term_signal_sent(&self) -> bool {
        self.inner.term_signal_sent.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.launched.get().map(|launched| launched.pid)
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner
            .launched
            .get()
            .and_then(|launched| launched.liveness.exit_status())
    }

    /// Most recent output lines, oldest first
    pub fn output_tail(&self) -> Vec<String> {
        self.inner.tail.snapshot()
    }

    /// The failure the output watcher stopped on, if any
    pub fn failure(&self) -> Option<HarnessError> {
        self.inner
            .launched
            .get()
            .and_then(|launched| launched.failure.get())
            .map(|failure| failure.into_error(self.app_name()))
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SupervisorState) {
        *self.lock_state() = state;
    }

    /// Prepare the working directory, launch the worker and start watching
    /// its output. Calling it on a supervisor that was already started does
    /// nothing.
    pub async fn start(&self) -> HarnessResult<()> {
        let mut process = self.inner.process.lock().await;
        let app = self.app_name();

        if self.state() != SupervisorState::NotStarted {
            worker_debug!(app, "⏭️ Start requested while {}, ignoring", self.state());
            return Ok(());
        }

        self.prepare_working_directory().await?;

        let config = &self.inner.config;
        let argv = config.command_line();
        log_startup(app, &config.display_command());

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .envs(config.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // A failed launch is final; the supervisor never retries it
        let launch_error = |source: std::io::Error| {
            self.set_state(SupervisorState::Stopped);
            HarnessError::Launch {
                app: app.to_string(),
                program: config.executable().to_path_buf(),
                source,
            }
        };

        let mut child = command.spawn().map_err(launch_error)?;
        let pid = child
            .id()
            .ok_or_else(|| launch_error(std::io::Error::other("worker exited before its pid was known")))?;

        let output = spawn_output_readers(child.stdout.take(), child.stderr.take());
        let lines: OutputReceiver = Arc::new(tokio::sync::Mutex::new(output));

        // The monitor owns the child; everyone else learns about the exit
        // through the watch channel.
        let (exit_tx, exit_rx) = watch::channel(None);
        let monitor_app = app.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    worker_debug!(monitor_app, "🏁 Worker exited: {}", status);
                    exit_tx.send_replace(Some(status));
                }
                Err(e) => {
                    worker_warn!(monitor_app, "⚠️ Failed to wait for worker: {}", e);
                }
            }
        });

        let liveness = Liveness::new(exit_rx, self.inner.term_signal_sent.clone());
        let watcher = OutputWatcher::new(
            app,
            self.inner.events.clone(),
            config.fatal_marker(),
            self.inner.tail.clone(),
            self.inner.drain_timeout,
        );
        let failure = watcher.failure_slot();
        let watcher = watcher.spawn(lines.clone(), liveness.clone());

        let _ = self.inner.launched.set(LaunchedProcess { pid, liveness, failure });
        *process = Some(RunningProcess { watcher, lines });
        self.set_state(SupervisorState::Running);

        worker_info!(app, "✅ Worker started (pid {})", pid);
        Ok(())
    }

    async fn prepare_working_directory(&self) -> HarnessResult<()> {
        let config = &self.inner.config;
        let dir = config.working_directory();

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| HarnessError::io(format!("creating {}", dir.display()), e))?;

        for seed in config.config_file().into_iter().chain(config.seed_files()) {
            let path = dir.join(&seed.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HarnessError::io(format!("creating {}", parent.display()), e))?;
            }
            // Always overwritten so every run starts from the canonical content
            tokio::fs::write(&path, &seed.content)
                .await
                .map_err(|e| HarnessError::io(format!("writing {}", path.display()), e))?;
            worker_debug!(self.app_name(), "📝 Wrote {}", path.display());
        }

        Ok(())
    }

    /// Fail if the worker has exited while it is still expected to run
    pub fn assert_alive(&self) -> HarnessResult<()> {
        if self.state() != SupervisorState::Running {
            return Ok(());
        }
        match self.inner.launched.get() {
            Some(launched) => launched
                .liveness
                .check(&self.inner.tail)
                .map_err(|failure| failure.into_error(self.app_name())),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SupervisorState::Running && self.assert_alive().is_ok()
    }

    /// Stop the worker.
    ///
    /// The output watcher is cancelled first, then the worker gets SIGTERM
    /// and the grace period to exit before it is killed. Output still in
    /// flight is drained into the log afterwards. A failure the watcher had
    /// already captured is returned ahead of any termination problem.
    /// Stopping a supervisor that is stopping or stopped does nothing.
    pub async fn stop(&self) -> HarnessResult<()> {
        let mut process = self.inner.process.lock().await;
        let app = self.app_name();

        {
            let mut state = self.lock_state();
            match *state {
                SupervisorState::Stopping | SupervisorState::Stopped => return Ok(()),
                SupervisorState::NotStarted => {
                    *state = SupervisorState::Stopped;
                    return Ok(());
                }
                SupervisorState::Running => *state = SupervisorState::Stopping,
            }
        }

        // A crash the watcher has not reported yet must survive the stop flag
        let exited_early = self
            .inner
            .launched
            .get()
            .and_then(|launched| launched.liveness.check(&self.inner.tail).err());

        self.inner.term_signal_sent.store(true, Ordering::SeqCst);
        log_shutdown(app, "stop requested");

        let (Some(running), Some(launched)) = (process.take(), self.inner.launched.get()) else {
            self.set_state(SupervisorState::Stopped);
            return Ok(());
        };

        let watcher_result = self.cancel_watcher(running.watcher, &launched.failure).await;
        let termination_result = self.terminate(launched).await;
        self.drain_remaining(&running.lines).await;
        self.remove_pid_file().await;

        self.set_state(SupervisorState::Stopped);
        worker_info!(app, "🛑 Worker stopped ({})", describe_exit(launched.liveness.exit_status()));

        watcher_result?;
        if let Some(failure) = exited_early {
            return Err(failure.into_error(app));
        }
        termination_result
    }

    async fn cancel_watcher(
        &self,
        watcher: JoinHandle<Result<(), WatchFailure>>,
        failure: &FailureSlot,
    ) -> HarnessResult<()> {
        watcher.abort();

        match watcher.await {
            Ok(Err(failure)) => Err(failure.into_error(self.app_name())),
            Err(e) if e.is_panic() => Err(HarnessError::WatcherPanicked {
                app: self.app_name().to_string(),
                reason: e.to_string(),
            }),
            // Finished cleanly or cancelled; a failure recorded before the
            // abort landed still counts.
            _ => match failure.get() {
                Some(failure) => Err(failure.into_error(self.app_name())),
                None => Ok(()),
            },
        }
    }

    async fn terminate(&self, launched: &LaunchedProcess) -> HarnessResult<()> {
        let app = self.app_name();
        let pid = launched.pid;
        let mut liveness = launched.liveness.clone();

        if liveness.has_exited() {
            worker_debug!(app, "💤 Worker already exited, no signal needed");
            return Ok(());
        }

        match self.inner.signals.terminate(pid) {
            Ok(()) => {
                worker_debug!(app, "📤 Sent SIGTERM to pid {}", pid);
                if let Ok(status) = timeout(self.inner.grace_period, liveness.wait_for_exit()).await {
                    worker_debug!(app, "👋 Worker exited after SIGTERM ({})", describe_exit(status));
                    return Ok(());
                }
                let error = HarnessError::TerminationTimeout {
                    app: app.to_string(),
                    grace: self.inner.grace_period,
                };
                worker_warn!(app, "⏰ {}, killing it", error);
            }
            Err(source) => {
                let error = HarnessError::Signal {
                    app: app.to_string(),
                    pid,
                    signal: "SIGTERM",
                    source,
                };
                worker_warn!(app, "⚠️ {}, killing it", error);
            }
        }

        self.inner
            .signals
            .force_kill(pid)
            .map_err(|source| HarnessError::Signal {
                app: app.to_string(),
                pid,
                signal: "SIGKILL",
                source,
            })?;
        worker_warn!(app, "🔪 Sent SIGKILL to pid {}", pid);

        match timeout(KILL_CONFIRM_TIMEOUT, liveness.wait_for_exit()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(HarnessError::KillFailed {
                app: app.to_string(),
                pid,
            }),
        }
    }

    /// Forward output produced during shutdown; nothing is matched any more
    async fn drain_remaining(&self, lines: &OutputReceiver) {
        let app = self.app_name();
        let drain = async {
            let mut lines = lines.lock().await;
            let mut drained = 0usize;
            while let Some(line) = lines.recv().await {
                self.inner.tail.push(line.text.clone());
                worker_output!(app, line.source, line.text);
                drained += 1;
            }
            drained
        };

        match timeout(self.inner.drain_timeout, drain).await {
            Ok(0) => {}
            Ok(drained) => {
                worker_debug!(app, "📥 Drained {} line(s) after shutdown", drained);
            }
            Err(_) => {
                worker_debug!(app, "⏰ Output still open after {:?}, leaving it", self.inner.drain_timeout);
            }
        }
    }

    async fn remove_pid_file(&self) {
        let Some(path) = self.inner.config.pid_file_path() else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                worker_debug!(self.app_name(), "🗑️ Removed {}", path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                worker_warn!(self.app_name(), "⚠️ Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    /// SIGKILL the worker right away without waiting for anything.
    ///
    /// Used when a session ends without an orderly teardown.
    pub fn emergency_kill(&self) {
        let Some(launched) = self.inner.launched.get() else {
            return;
        };
        if launched.liveness.has_exited() {
            return;
        }

        self.inner.term_signal_sent.store(true, Ordering::SeqCst);
        match self.inner.signals.force_kill(launched.pid) {
            Ok(()) => {
                worker_warn!(self.app_name(), "🚨 Emergency kill of pid {}", launched.pid);
            }
            Err(e) => {
                worker_warn!(self.app_name(), "⚠️ Emergency kill of pid {} failed: {}", launched.pid, e);
            }
        }
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    status
        .map(|status| status.to_string())
        .unwrap_or_else(|| "exit status unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::signals::MockProcessSignals;
    use assert_matches::assert_matches;
    use mockall::Sequence;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;
    use tempfile::TempDir;

    fn settings(root: &TempDir) -> HarnessSettings {
        HarnessSettings::default()
            .with_repo_root(root.path())
            .with_grace_period(Duration::from_millis(300))
            .with_drain_timeout(Duration::from_millis(200))
    }

    /// Executable that ignores its arguments and sleeps until killed
    fn sleeper(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("sleeper.sh");
        std::fs::write(&path, "#!/bin/sh\necho sleeper up\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Executable that crashes while a background child keeps its stdout open
    fn crasher(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("crasher.sh");
        std::fs::write(&path, "#!/bin/sh\necho about to crash\nsleep 5 &\nexit 3\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let root = TempDir::new().unwrap();
        let mut signals = MockProcessSignals::new();
        signals.expect_terminate().never();
        signals.expect_force_kill().never();

        let config = ProcessConfig::builder("client1")
            .executable("/opt/worker/client")
            .repo_root(root.path())
            .build()
            .unwrap();
        let supervisor = ProcessSupervisor::with_signals(config, &settings(&root), Arc::new(signals)).unwrap();

        supervisor.stop().await.unwrap();
        supervisor.stop().await.unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(!supervisor.term_signal_sent());
        assert!(supervisor.assert_alive().is_ok());
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let root = TempDir::new().unwrap();
        let config = ProcessConfig::builder("client1")
            .executable(root.path().join("does-not-exist"))
            .repo_root(root.path())
            .config_file("client.conf", "open-file-limit = 4096\n")
            .build()
            .unwrap();
        let supervisor = ProcessSupervisor::new(config, &settings(&root)).unwrap();

        let result = supervisor.start().await;

        assert_matches!(result, Err(HarnessError::Launch { ref app, .. }) if app == "client1");
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(supervisor.pid(), None);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        // The working directory is prepared before the launch attempt
        assert!(root.path().join("client1/client.conf").exists());

        // A failed launch is not retried
        supervisor.start().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(supervisor.pid(), None);
    }

    #[tokio::test]
    async fn test_stop_reports_crash_before_watcher_does() {
        let root = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        let mut signals = MockProcessSignals::new();
        signals.expect_terminate().never();
        signals.expect_force_kill().never();

        let config = ProcessConfig::builder("client1")
            .executable(crasher(&bin))
            .repo_root(root.path())
            .build()
            .unwrap();
        let settings = settings(&root).with_drain_timeout(Duration::from_secs(2));
        let supervisor = ProcessSupervisor::with_signals(config, &settings, Arc::new(signals)).unwrap();
        supervisor.start().await.unwrap();

        timeout(Duration::from_secs(5), async {
            while supervisor.exit_status().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // The background child still holds stdout, so the watcher is draining
        assert!(supervisor.failure().is_none());

        let result = supervisor.stop().await;

        match result {
            Err(HarnessError::UnexpectedExit { status, .. }) => {
                assert_eq!(status.and_then(|s| s.code()), Some(3));
            }
            other => panic!("expected an unexpected exit, got {other:?}"),
        }
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_start_overwrites_stale_config() {
        let root = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        let stale = root.path().join("client1/client.conf");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "stale = true\n").unwrap();

        let config = ProcessConfig::builder("client1")
            .executable(sleeper(&bin))
            .repo_root(root.path())
            .config_file("client.conf", "open-file-limit = 4096\n")
            .seed_file("i2p/i2p-private-key", "key")
            .build()
            .unwrap();
        let supervisor = ProcessSupervisor::new(config, &settings(&root)).unwrap();

        supervisor.start().await.unwrap();
        supervisor.start().await.unwrap();

        assert_eq!(std::fs::read_to_string(&stale).unwrap(), "open-file-limit = 4096\n");
        assert_eq!(
            std::fs::read_to_string(root.path().join("client1/i2p/i2p-private-key")).unwrap(),
            "key"
        );
        assert_eq!(supervisor.state(), SupervisorState::Running);

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_kill_only_after_grace_period() {
        let root = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        let mut seq = Sequence::new();
        let mut signals = MockProcessSignals::new();
        // SIGTERM is swallowed, so only the kill ends the worker
        signals
            .expect_terminate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        signals
            .expect_force_kill()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|pid| UnixSignals.force_kill(pid));

        let config = ProcessConfig::builder("stubborn")
            .executable(sleeper(&bin))
            .repo_root(root.path())
            .build()
            .unwrap();
        let supervisor = ProcessSupervisor::with_signals(config, &settings(&root), Arc::new(signals)).unwrap();
        supervisor.start().await.unwrap();

        let started = Instant::now();
        supervisor.stop().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(supervisor.exit_status().is_some());
        assert!(supervisor.term_signal_sent());

        // Second stop sends nothing
        supervisor.stop().await.unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SupervisorState::NotStarted.to_string(), "not started");
        assert_eq!(SupervisorState::Stopping.to_string(), "stopping");
    }
}
