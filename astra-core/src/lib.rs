//! # Astra Core Library (`astra-core`)
//!
//! `astra-core` is the foundational library of the Astra display server
//! project. It provides the services every other layer builds on:
//!
//! - **Error handling**: a unified error system through [`CoreError`] and
//!   the more specific [`ConfigError`](error::ConfigError).
//! - **Configuration**: TOML-based configuration loading with default
//!   fallbacks and validation, through [`ConfigLoader`](config::ConfigLoader)
//!   and [`CoreConfig`](config::CoreConfig).
//! - **Logging**: a `tracing`-based logging framework, configurable for
//!   console and rolling-file output in text or JSON format.
//!
//! ```rust,ignore
//! use astra_core::config::ConfigLoader;
//! use astra_core::logging::initialize_logging;
//!
//! let config = ConfigLoader::load_from_path("/etc/astra/config.toml".as_ref())?;
//! initialize_logging(&config.logging)?;
//! tracing::info!("Astra core initialized");
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use error::CoreError;
