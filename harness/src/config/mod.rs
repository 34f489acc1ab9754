//! Configuration Management
//!
//! This module provides worker configurations, their builder, the worker
//! flavors and the session-wide harness settings.

pub mod builder;
pub mod flavors;
pub mod patterns;
pub mod process;
pub mod settings;

// Re-export main types
pub use builder::ProcessConfigBuilder;
pub use flavors::WorkerRole;
pub use process::{ProcessConfig, SeedFile};
pub use settings::HarnessSettings;
