//! Shared logging utilities for consistent tracing across both processes
//!
//! Everything goes to stderr: a worker's stdout is the framed message
//! channel, so writing a log line there would corrupt the protocol.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::types::ProcessRole;

/// Initialize the tracing subscriber for this process
pub fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let base_level = log_level.unwrap_or("info");
    let filter = match ProcessRole::get() {
        Some(ProcessRole::Supervisor) => {
            format!("supervisor={base_level},shared={base_level}")
        }
        Some(ProcessRole::Worker(_)) => {
            format!("worker={base_level},shared={base_level}")
        }
        None => base_level.to_string(),
    };

    fmt()
        .with_env_filter(EnvFilter::new(&filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for process-aware info logging
#[macro_export]
macro_rules! process_info {
    ($role:expr, $($arg:tt)*) => {
        tracing::info!(
            process = %$role,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware warning logging
#[macro_export]
macro_rules! process_warn {
    ($role:expr, $($arg:tt)*) => {
        tracing::warn!(
            process = %$role,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware error logging
#[macro_export]
macro_rules! process_error {
    ($role:expr, $($arg:tt)*) => {
        tracing::error!(
            process = %$role,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware debug logging
#[macro_export]
macro_rules! process_debug {
    ($role:expr, $($arg:tt)*) => {
        tracing::debug!(
            process = %$role,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(role: &ProcessRole, details: &str) {
    info!(
        process = %role,
        timestamp = format_timestamp(),
        "🚀 Starting {}",
        details
    );
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(role: &ProcessRole, reason: &str) {
    info!(
        process = %role,
        timestamp = format_timestamp(),
        "🛑 Shutting down: {}",
        reason
    );
}

/// Contextual logging helper for error conditions
pub fn log_error(role: &ProcessRole, context: &str, error: &dyn std::fmt::Display) {
    error!(
        process = %role,
        timestamp = format_timestamp(),
        error = %error,
        "❌ {} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(role: &ProcessRole, message: &str) {
    info!(
        process = %role,
        timestamp = format_timestamp(),
        "✅ {}",
        message
    );
}
