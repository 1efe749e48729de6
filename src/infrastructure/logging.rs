//! Tracing subscriber setup for hosts embedding the store.

use std::path::Path;

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::infrastructure::config::LogLevel;

/// Errors from logging initialisation.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Log file or its directory could not be opened.
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),
    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs a global subscriber filtered by `RUST_LOG`, falling back to `level`.
///
/// With a `log_path` events are appended to that file without ANSI colours.
///
/// # Errors
/// Returns error if the log file cannot be opened or a subscriber is already set.
pub fn init_logging(level: LogLevel, log_path: Option<&Path>) -> Result<(), LoggingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if let Some(log_path) = log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .try_init()?;

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()?;
    }

    Ok(())
}
