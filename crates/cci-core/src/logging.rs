//! Logging infrastructure for CC-Insights.
//!
//! Structured logging on top of the `tracing` ecosystem:
//!
//! - JSON lines written to `<data_dir>/logs/cci.log` (rotated daily)
//! - Compact console output on stderr, warnings only unless verbose
//! - `-v` switches the default level from INFO to DEBUG; `RUST_LOG` wins
//!   over both
//!
//! ## Example
//!
//! ```no_run
//! use cci_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//! tracing::info!("sync started");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::InsightsPaths;
use crate::error::{InsightsError, Result};

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Keep this alive for the lifetime of the application.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the logging system.
///
/// # Arguments
///
/// * `log_dir` - Optional custom log directory. Defaults to `<data_dir>/logs/`
/// * `verbose` - If true, sets log level to DEBUG. Otherwise uses INFO.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| InsightsError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "cci.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cci={default_level}")));

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
        .with_target(verbose)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact()
        .with_filter(if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        });

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

/// Default log directory: `<data_dir>/logs/`.
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(InsightsPaths::from_env()?.log_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_log_dir_follows_data_dir() {
        // SAFETY: serialized with the other env-mutating tests
        unsafe { std::env::set_var("CC_INSIGHTS_DATA_DIR", "/tmp/cci-test") };
        let dir = default_log_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/cci-test/logs"));
        unsafe { std::env::remove_var("CC_INSIGHTS_DATA_DIR") };
    }

    #[test]
    fn test_init_test_logging() {
        init_test_logging();
        init_test_logging();
    }
}
