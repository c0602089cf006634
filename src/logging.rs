//! Tracing subscriber setup
//!
//! Events always go to a log file in the data directory through a
//! non-blocking writer. Interactive commands also print to stderr.
//! `RUST_LOG` overrides the default `info` filter.

use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log path: {0}")]
    InvalidPath(String),

    #[error("Failed to install subscriber: {0}")]
    Init(#[from] TryInitError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Write file events as JSON objects
    pub json: bool,
    /// Mirror events to stderr
    pub stderr: bool,
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop, so keep it alive
/// for as long as the process logs.
pub fn init(log_path: &Path, options: LogOptions) -> Result<WorkerGuard, LoggingError> {
    let (Some(dir), Some(file_name)) = (log_path.parent(), log_path.file_name()) else {
        return Err(LoggingError::InvalidPath(log_path.display().to_string()));
    };
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_layer = options
        .json
        .then(|| fmt::layer().json().with_writer(writer.clone()));
    let text_layer = (!options.json).then(|| fmt::layer().with_ansi(false).with_writer(writer));
    let stderr_layer = options.stderr.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(guard)
}
