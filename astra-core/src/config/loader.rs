//! Loading and validation of the core configuration.

use std::fs;
use std::path::Path;

use crate::config::types::CoreConfig;
use crate::error::ConfigError;

const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Loads and validates [`CoreConfig`] values.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration from a TOML file.
    ///
    /// A missing file is not an error: the defaults are returned instead,
    /// so a freshly installed system runs without any configuration on
    /// disk. An unreadable or unparsable file is surfaced as a
    /// [`ConfigError`].
    pub fn load_from_path(path: &Path) -> Result<CoreConfig, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No configuration file found, using defaults");
            return Ok(CoreConfig::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_from_str(&content, path)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// `origin` is only used for error reporting.
    pub fn load_from_str(content: &str, origin: &Path) -> Result<CoreConfig, ConfigError> {
        let config: CoreConfig = toml::from_str(content).map_err(|source| ConfigError::ParseError {
            path: origin.to_path_buf(),
            source,
        })?;
        Self::validate(config)
    }

    /// Validates a parsed configuration, normalizing the log level.
    fn validate(mut config: CoreConfig) -> Result<CoreConfig, ConfigError> {
        config.logging.level = config.logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log level '{}' (expected one of {:?})",
                config.logging.level, VALID_LEVELS
            )));
        }
        Ok(config)
    }
}
