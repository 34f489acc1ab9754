//! Runtime Management
//!
//! This module launches workers, watches their output for events and
//! cleans everything up at the end of a session.

pub mod janitor;
pub mod output;
pub mod registry;
pub mod signals;
pub mod supervisor;
pub mod waiter;
pub mod watcher;

// Re-export main types
pub use crate::error::TeardownFailure;
pub use janitor::ProcessJanitor;
pub use output::{OutputLine, OutputSource, OutputTail};
pub use registry::{EventRegistry, EventStatus, ObservedEvent};
pub use signals::{ProcessSignals, UnixSignals};
pub use supervisor::{ProcessSupervisor, SupervisorState};
pub use waiter::EventWaiter;
pub use watcher::{Liveness, OutputWatcher, WatchFailure};
