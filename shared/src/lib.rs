//! Shared utilities for the worker harness
//!
//! Contains only what every binary in the workspace needs: process-aware
//! logging so that each supervised worker's lines carry its own prefix.

pub mod logging;

pub use logging::{format_timestamp, init_tracing, WORKER_OUTPUT_TARGET};
