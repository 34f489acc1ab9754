//! Event Waiter
//!
//! Polls a supervisor's event registry until a pattern has been observed.
//! [`EventWaiter::await_event`] has no timeout of its own; callers that want
//! one use [`EventWaiter::await_event_within`] or wrap the call in
//! `tokio::time::timeout`.

use std::time::{Duration, Instant};

use shared::{worker_debug, worker_info};

use super::registry::ObservedEvent;
use super::supervisor::{ProcessSupervisor, SupervisorState};
use crate::config::HarnessSettings;
use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy)]
pub struct EventWaiter {
    poll_interval: Duration,
}

impl Default for EventWaiter {
    fn default() -> Self {
        Self::from_settings(&HarnessSettings::default())
    }
}

impl EventWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn from_settings(settings: &HarnessSettings) -> Self {
        Self::new(settings.poll_interval)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until `pattern` has been observed in the worker's output.
    ///
    /// Returns right away when the event was seen before the call. Fails
    /// when the pattern is not registered, when the worker hits a fatal
    /// line or exits, or when the supervisor is being stopped.
    pub async fn await_event(&self, supervisor: &ProcessSupervisor, pattern: &str) -> HarnessResult<ObservedEvent> {
        let app = supervisor.app_name();
        let events = supervisor.events();

        if !events.contains(pattern) {
            return Err(HarnessError::UnknownPattern {
                app: app.to_string(),
                pattern: pattern.to_string(),
            });
        }

        let started = Instant::now();
        let mut polls: u64 = 0;

        loop {
            if let Some(event) = events.observed(pattern) {
                if polls > 0 {
                    worker_info!(
                        app,
                        "🎯 '{}' observed after {:.1}s",
                        pattern,
                        started.elapsed().as_secs_f64()
                    );
                }
                return Ok(event);
            }

            if let Some(error) = supervisor.failure() {
                return Err(error);
            }
            supervisor.assert_alive()?;

            let state = supervisor.state();
            if matches!(state, SupervisorState::Stopping | SupervisorState::Stopped) {
                return Err(HarnessError::NotRunning {
                    app: app.to_string(),
                    pattern: pattern.to_string(),
                    state: state.to_string(),
                });
            }

            if polls == 0 {
                worker_info!(app, "⏳ Waiting for '{}'", pattern);
            } else {
                worker_debug!(
                    app,
                    "⏳ Still waiting for '{}' ({:.0}s elapsed)",
                    pattern,
                    started.elapsed().as_secs_f64()
                );
            }

            polls += 1;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Like [`await_event`](Self::await_event), giving up after `timeout`
    pub async fn await_event_within(
        &self,
        supervisor: &ProcessSupervisor,
        pattern: &str,
        timeout: Duration,
    ) -> HarnessResult<ObservedEvent> {
        match tokio::time::timeout(timeout, self.await_event(supervisor, pattern)).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::EventTimeout {
                app: supervisor.app_name().to_string(),
                pattern: pattern.to_string(),
                timeout,
            }),
        }
    }

    /// Wait using the worker's configured advisory timeout
    pub async fn await_event_bounded(&self, supervisor: &ProcessSupervisor, pattern: &str) -> HarnessResult<ObservedEvent> {
        let timeout = supervisor.config().timeout();
        self.await_event_within(supervisor, pattern, timeout).await
    }

    /// Wait for several events one after the other
    pub async fn await_all<S: AsRef<str>>(
        &self,
        supervisor: &ProcessSupervisor,
        patterns: &[S],
    ) -> HarnessResult<Vec<ObservedEvent>> {
        let mut observed = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            observed.push(self.await_event(supervisor, pattern.as_ref()).await?);
        }
        Ok(observed)
    }
}
