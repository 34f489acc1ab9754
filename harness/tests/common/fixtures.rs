//! Test fixtures and data for harness tests
//!
//! This module provides consistent worker output lines and timings used
//! across all test suites.

use std::path::PathBuf;
use std::time::Duration;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// Output lines in the shape real workers print them
    pub const LISTENING_LINE: &'static str = "[INFO] TCP address 127.0.0.1:7070 listening";
    pub const ABORT_LINE: &'static str = "[ABORT] disk full";
    pub const CACHE_LINE: &'static str = "[DEBUG] bep5 store successfully published to cache";
    pub const SHUTDOWN_LINE: &'static str = "[INFO] shutting down cleanly";

    /// Config file every client-style worker gets
    pub const CLIENT_CONF: &'static str = "client.conf";
    pub const CLIENT_CONF_CONTENT: &'static str = "open-file-limit = 4096\n";

    /// Timings short enough to keep the suite fast
    pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
    pub const GRACE_PERIOD: Duration = Duration::from_millis(500);
    pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

    /// Upper bound for anything a test waits on
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// The scriptable worker built alongside the harness
    pub fn mock_worker() -> PathBuf {
        PathBuf::from(env!("CARGO_BIN_EXE_mock-worker"))
    }
}
