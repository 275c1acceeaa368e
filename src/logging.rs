// src/logging.rs
//
// tracing setup for the bridge process.
// Human-readable lines go to stderr; with a log directory, the same events are
// also written to a daily rolling file through a non-blocking writer.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::LoggingError;

/// File name prefix for rolling log files; the date is appended per day
pub const LOG_FILE_PREFIX: &str = "naruko.log";

/// Install the global subscriber.
///
/// `RUST_LOG`, when set and valid, wins over `level`. The returned guard must be
/// held for the life of the process or buffered file output is lost.
pub fn init(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = build_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), level)?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::LogDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

fn build_filter(env: Option<&str>, level: &str) -> Result<EnvFilter, LoggingError> {
    if let Some(directives) = env.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok(filter),
            Err(e) => eprintln!("Ignoring invalid {}: {}", EnvFilter::DEFAULT_ENV, e),
        }
    }
    Ok(EnvFilter::try_new(level)?)
}
