//! Logging infrastructure for tokwatch.
//!
//! Structured logging on the `tracing` ecosystem:
//!
//! - JSON lines written to `~/.tokwatch/logs/tokwatch.log` (rotated daily)
//! - Compact human-readable output on stderr
//! - `-v` raises the default level from INFO to DEBUG; `RUST_LOG` wins over both
//!
//! ## Example
//!
//! ```no_run
//! use tokwatch_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//!
//! tracing::info!("tokwatch started");
//! tracing::debug!(files = 12, "scanned log root");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{Result, TokwatchError};

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Keep this alive for the lifetime of the application.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the tokwatch logging system.
///
/// # Arguments
///
/// * `log_dir` - Optional custom log directory. Defaults to `~/.tokwatch/logs/`
/// * `verbose` - If true, sets log level to DEBUG. Otherwise uses INFO.
///
/// # Returns
///
/// A [`LogGuard`] that must be held for the application lifetime.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| TokwatchError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "tokwatch.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tokwatch={default_level},tokwatch_usage={default_level}"))
    });

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Initialize minimal console-only logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Base directory for tokwatch state: `~/.tokwatch/`.
pub fn tokwatch_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".tokwatch"))
        .ok_or(TokwatchError::HomeNotFound)
}

/// Get the default log directory path: `~/.tokwatch/logs/`.
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(tokwatch_home()?.join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir_is_under_home() {
        let dir = default_log_dir().unwrap();
        assert!(dir.ends_with(".tokwatch/logs"));
    }

    #[test]
    fn test_init_test_logging() {
        init_test_logging();
        init_test_logging();
    }
}
