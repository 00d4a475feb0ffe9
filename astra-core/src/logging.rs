//! Logging for the Astra core library.
//!
//! A configurable logging setup built on the `tracing` ecosystem. Console
//! output is always enabled; file logging (daily rolling, text or JSON) is
//! added when [`LoggingConfig::file`] is set.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::CoreError;

use once_cell::sync::Lazy;
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Keeps the non-blocking file writer alive for the lifetime of the process.
static LOG_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Intended for tests and for early startup before the configuration is
/// loaded. Filters via `RUST_LOG`, defaulting to `info`. Errors (e.g. a
/// global subscriber being already installed) are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

/// Initializes logging according to the given configuration.
///
/// Installs the global subscriber; calling this twice therefore fails with
/// [`CoreError::LoggingInitialization`]. `RUST_LOG`, when set, overrides the
/// configured level.
pub fn initialize_logging(config: &LoggingConfig) -> Result<(), CoreError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Text => fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .boxed(),
    };
    layers.push(console_layer);

    if let Some(path) = &config.file {
        let (layer, guard) = create_file_layer(path, config.format)?;
        layers.push(layer);
        *LOG_GUARD
            .lock()
            .map_err(|e| CoreError::LoggingInitialization(e.to_string()))? = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| CoreError::LoggingInitialization(e.to_string()))
}

/// Creates the daily-rolling file layer and its worker guard.
fn create_file_layer(
    log_path: &std::path::Path,
    format: LogFormat,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, WorkerGuard), CoreError> {
    let directory = log_path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = directory {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_appender = tracing_appender::rolling::daily(
        directory.unwrap_or_else(|| std::path::Path::new(".")),
        log_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("astra.log")),
    );
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .boxed(),
        LogFormat::Text => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
    };
    Ok((layer, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_logging_is_idempotent() {
        init_minimal_logging();
        init_minimal_logging();
        tracing::debug!("logging smoke test");
    }

    #[test]
    fn file_layer_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("astra.log");
        let (_layer, _guard) = create_file_layer(&path, LogFormat::Text).unwrap();
        assert!(path.parent().unwrap().exists());
    }
}
