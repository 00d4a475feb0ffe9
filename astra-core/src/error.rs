//! Error handling for the Astra core layer.
//!
//! This module defines the error types used throughout the core crate,
//! built with the `thiserror` crate. The main error type is [`CoreError`],
//! which wraps the more specific [`ConfigError`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for the Astra core layer.
///
/// Used as the common error type of this crate, usually by wrapping a more
/// specific error.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Errors related to configuration loading, parsing, or validation.
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    /// Errors during the initialization of the logging system.
    #[error("Logging Initialization Failed: {0}")]
    LoggingInitialization(String),

    /// General I/O errors not covered by a more specific variant.
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file content is not valid TOML for [`CoreConfig`].
    ///
    /// [`CoreConfig`]: crate::config::CoreConfig
    #[error("Failed to parse configuration file {path:?}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The configuration was syntactically valid but semantically rejected.
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}
