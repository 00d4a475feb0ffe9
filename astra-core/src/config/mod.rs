//! Configuration management for the Astra core layer.
//!
//! The configuration schema lives in [`types`] ([`CoreConfig`],
//! [`LoggingConfig`]); [`loader`] implements TOML loading and validation
//! through [`ConfigLoader`]. A missing configuration file falls back to
//! defaults, a malformed one is reported as
//! [`ConfigError`](crate::error::ConfigError).

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{CoreConfig, LogFormat, LoggingConfig};
