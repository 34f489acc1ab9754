//! Process Janitor
//!
//! Session-wide owner of every supervisor created through it. Teardown
//! stops all of them, whatever happened during the test, and removes the
//! shared repo root afterwards.

use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use super::supervisor::{ProcessSupervisor, SupervisorState};
use crate::config::{HarnessSettings, ProcessConfig};
use crate::error::{HarnessError, HarnessResult, TeardownFailure};

struct Inner {
    settings: HarnessSettings,
    supervisors: Mutex<Vec<ProcessSupervisor>>,
    torn_down: AtomicBool,
}

#[derive(Clone)]
pub struct ProcessJanitor {
    inner: Arc<Inner>,
}

impl ProcessJanitor {
    pub fn new(settings: HarnessSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                supervisors: Mutex::new(Vec::new()),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// Run `body` with a fresh janitor and always tear it down afterwards.
    ///
    /// An error from the body wins over a teardown error; the latter is
    /// still logged. A panicking body is torn down first and then resumes
    /// unwinding.
    pub async fn session<F, Fut, T>(settings: HarnessSettings, body: F) -> HarnessResult<T>
    where
        F: FnOnce(ProcessJanitor) -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        let janitor = ProcessJanitor::new(settings);
        let result = match AssertUnwindSafe(body(janitor.clone())).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                warn!("💥 Session body panicked, tearing down");
                if let Err(e) = janitor.teardown().await {
                    error!("❌ Teardown after panicked session failed: {}", e);
                }
                resume_unwind(panic);
            }
        };
        let teardown = janitor.teardown().await;

        match (result, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_error)) => {
                error!("❌ Teardown after failed session also failed: {}", teardown_error);
                Err(e)
            }
        }
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.inner.settings
    }

    pub fn repo_root(&self) -> &Path {
        &self.inner.settings.repo_root
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProcessSupervisor>> {
        self.inner.supervisors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a supervisor so teardown stops it
    pub fn register(&self, supervisor: ProcessSupervisor) {
        if self.inner.torn_down.load(Ordering::SeqCst) {
            warn!(
                "⚠️ Registering {} after teardown; it will not be cleaned up",
                supervisor.app_name()
            );
        }
        debug!("📋 Registered supervisor {}", supervisor.app_name());
        self.lock().push(supervisor);
    }

    /// Create and register a supervisor for `config`.
    ///
    /// The worker must live under this janitor's repo root and its name must
    /// not collide with another supervisor that has not been stopped.
    pub fn supervise(&self, config: ProcessConfig) -> HarnessResult<ProcessSupervisor> {
        if config.repo_root() != self.repo_root() {
            return Err(HarnessError::config(
                "repo_root",
                format!(
                    "'{}' is outside the session repo root '{}'",
                    config.repo_root().display(),
                    self.repo_root().display()
                ),
            ));
        }

        let collides = self.lock().iter().any(|existing| {
            existing.app_name() == config.app_name() && existing.state() != SupervisorState::Stopped
        });
        if collides {
            return Err(HarnessError::config(
                "app_name",
                format!("'{}' is already used by a live supervisor", config.app_name()),
            ));
        }

        let supervisor = ProcessSupervisor::new(config, &self.inner.settings)?;
        self.register(supervisor.clone());
        Ok(supervisor)
    }

    /// [`supervise`](Self::supervise) and start the worker
    pub async fn launch(&self, config: ProcessConfig) -> HarnessResult<ProcessSupervisor> {
        let supervisor = self.supervise(config)?;
        supervisor.start().await?;
        Ok(supervisor)
    }

    pub fn supervisors(&self) -> Vec<ProcessSupervisor> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Stop every registered supervisor, then delete the repo root.
    ///
    /// A supervisor that fails to stop does not keep the others running;
    /// all stop failures are returned together. Only the first call does
    /// any work.
    pub async fn teardown(&self) -> HarnessResult<()> {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            debug!("⏭️ Teardown already done");
            return Ok(());
        }

        let supervisors = std::mem::take(&mut *self.lock());
        info!("🧹 Tearing down {} supervisor(s)", supervisors.len());

        let mut failures = Vec::new();
        for supervisor in supervisors {
            if let Err(error) = supervisor.stop().await {
                warn!("⚠️ Failed to stop {}: {}", supervisor.app_name(), error);
                failures.push(TeardownFailure {
                    app_name: supervisor.app_name().to_string(),
                    error,
                });
            }
        }

        let cleanup = self.remove_repo_root().await;

        if !failures.is_empty() {
            if let Err(e) = cleanup {
                error!("❌ {}", e);
            }
            return Err(HarnessError::Teardown { failures });
        }
        cleanup?;

        info!("✅ Teardown complete");
        Ok(())
    }

    async fn remove_repo_root(&self) -> HarnessResult<()> {
        let root = self.repo_root();

        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => debug!("🗑️ Removed {}", root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HarnessError::Cleanup {
                    path: root.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }

        match tokio::fs::try_exists(root).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(HarnessError::Cleanup {
                path: root.to_path_buf(),
                reason: "directory still exists after removal".to_string(),
            }),
            Err(e) => Err(HarnessError::Cleanup {
                path: root.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        let supervisors = self.supervisors.get_mut().unwrap_or_else(PoisonError::into_inner);
        if supervisors.is_empty() {
            return;
        }

        warn!(
            "🚨 Janitor dropped without teardown, killing {} worker(s)",
            supervisors.len()
        );
        for supervisor in supervisors.iter() {
            supervisor.emergency_kill();
        }
    }
}
