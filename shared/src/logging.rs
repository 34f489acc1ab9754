//! Shared logging utilities for consistent tracing across the harness and its workers

use chrono::{DateTime, Utc};
use tracing::info;

/// Tracing target every forwarded worker output line is emitted under
pub const WORKER_OUTPUT_TARGET: &str = "worker_output";

/// Build the filter directive used by [`init_tracing`]
pub fn filter_directive(log_level: Option<&str>) -> String {
    let base_level = log_level.unwrap_or("info");
    format!("harness={base_level},shared={base_level},mock_worker={base_level},{WORKER_OUTPUT_TARGET}={base_level}")
}

/// Initialize the fmt subscriber for the harness
///
/// Safe to call more than once: later calls (for instance from several
/// integration tests in one binary) leave the first subscriber in place.
pub fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::new(filter_directive(log_level));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for worker-aware info logging
#[macro_export]
macro_rules! worker_info {
    ($app:expr, $($arg:tt)*) => {
        tracing::info!(
            app = %$app,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for worker-aware warning logging
#[macro_export]
macro_rules! worker_warn {
    ($app:expr, $($arg:tt)*) => {
        tracing::warn!(
            app = %$app,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for worker-aware error logging
#[macro_export]
macro_rules! worker_error {
    ($app:expr, $($arg:tt)*) => {
        tracing::error!(
            app = %$app,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for worker-aware debug logging
#[macro_export]
macro_rules! worker_debug {
    ($app:expr, $($arg:tt)*) => {
        tracing::debug!(
            app = %$app,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Forward one line of a worker's combined output to the diagnostic sink
#[macro_export]
macro_rules! worker_output {
    ($app:expr, $stream:expr, $line:expr) => {
        tracing::info!(
            target: "worker_output",
            app = %$app,
            stream = %$stream,
            "{}",
            $line
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(app_name: &str, details: &str) {
    info!(
        app = %app_name,
        timestamp = format_timestamp(),
        "🚀 Starting {}",
        details
    );
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(app_name: &str, reason: &str) {
    info!(
        app = %app_name,
        timestamp = format_timestamp(),
        "🛑 Shutting down: {}",
        reason
    );
}
