//! Centralized file-based logging system
//!
//! Writes logs to files under the configured log directory, separated by type:
//! - main/  - all events (JSON)
//! - error/ - WARN and ERROR only
//! - path/  - path lifecycle, fan-out and worker events
//! - hook/  - hook pipeline events
//! - node/  - endpoint events

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Per-type log subdirectories
pub const LOG_TYPES: [&str; 5] = ["main", "error", "path", "hook", "node"];

/// Initialize centralized file logging
///
/// Creates `dir` and one subdirectory per log type. Returns the guards which
/// must be kept alive for the duration of the program.
pub fn init_logging(dir: &Path) -> io::Result<Vec<WorkerGuard>> {
    prepare_dirs(dir)?;

    let mut guards = Vec::new();

    // Main log - all logs
    let (main_appender, main_guard) = create_appender(dir, "main");
    guards.push(main_guard);

    // Error log - ERROR and WARN only
    let (error_appender, error_guard) = create_appender(dir, "error");
    guards.push(error_guard);

    let (path_appender, path_guard) = create_appender(dir, "path");
    guards.push(path_guard);

    let (hook_appender, hook_guard) = create_appender(dir, "hook");
    guards.push(hook_guard);

    let (node_appender, node_guard) = create_appender(dir, "node");
    guards.push(node_guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let path_layer = tracing_subscriber::fmt::layer()
        .with_writer(path_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().starts_with("path") || metadata.target().contains("worker")
        }));

    let hook_layer = tracing_subscriber::fmt::layer()
        .with_writer(hook_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().starts_with("hook")
        }));

    let node_layer = tracing_subscriber::fmt::layer()
        .with_writer(node_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().starts_with("node")
        }));

    // Console layer for development
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(error_layer)
        .with(path_layer)
        .with(hook_layer)
        .with(node_layer)
        .with(console_layer)
        .init();

    tracing::info!(dir = %dir.display(), "Logging system initialized");

    Ok(guards)
}

fn prepare_dirs(dir: &Path) -> io::Result<()> {
    for log_type in &LOG_TYPES {
        fs::create_dir_all(dir.join(log_type))?;
    }
    Ok(())
}

/// Create a daily rolling file appender in `dir/name`
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir.join(name), name);

    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_path {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "path", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_hook {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "hook", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_node {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "node", $level, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_creation() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");

        prepare_dirs(&dir).unwrap();
        for log_type in &LOG_TYPES {
            assert!(dir.join(log_type).is_dir());
        }
        // Idempotent
        prepare_dirs(&dir).unwrap();
    }
}
