//! Configuration struct definitions for the Astra core layer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure for the core layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Configuration of the logging subsystem.
    pub logging: LoggingConfig,
}

/// Output format for log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Newline-delimited JSON output.
    Json,
}

/// Configuration specific to the logging subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter: one of `trace`, `debug`, `info`, `warn`, `error`.
    ///
    /// Normalized to lowercase during validation. The `RUST_LOG` environment
    /// variable, when set, takes precedence over this value.
    pub level: String,

    /// Optional path of a log file. When set, a daily-rolling file appender
    /// is added next to the console output.
    pub file: Option<PathBuf>,

    /// Format used for log records.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Text,
        }
    }
}
