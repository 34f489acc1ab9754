//! Worker Process Harness
//!
//! Launches externally built worker binaries for integration tests, watches
//! their combined output for named events and guarantees they are stopped
//! and cleaned up when the test session ends.
//!
//! ## Main Interface
//!
//! A [`ProcessJanitor`] owns the session. Workers are described by a
//! [`ProcessConfig`], launched through the janitor as a
//! [`ProcessSupervisor`], and test code blocks on events with an
//! [`EventWaiter`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use harness::*;
//!
//! # async fn run() -> HarnessResult<()> {
//! let settings = HarnessSettings::from_env()?;
//!
//! ProcessJanitor::session(settings.clone(), |janitor| async move {
//!     let config = flavors::cache_injector(&settings, "injector")?
//!         .args(["--listen-on-tcp", "127.0.0.1:7070"])
//!         .build()?;
//!     let injector = janitor.launch(config).await?;
//!
//!     let waiter = EventWaiter::from_settings(&settings);
//!     waiter.await_event(&injector, patterns::TCP_LISTENING).await?;
//!     Ok(())
//! })
//! .await
//! # }
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod runtime;

// Main interfaces - re-exported at crate root for convenience
pub use config::{HarnessSettings, ProcessConfig, ProcessConfigBuilder, SeedFile, WorkerRole};
pub use error::{HarnessError, HarnessResult, TeardownFailure};
pub use runtime::{EventWaiter, ProcessJanitor, ProcessSupervisor, SupervisorState};

// Supporting types
pub use config::{flavors, patterns};
pub use runtime::{EventRegistry, EventStatus, ObservedEvent, OutputSource, ProcessSignals, UnixSignals};
