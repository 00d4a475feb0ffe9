//! The DRM backend: lifecycle management of one GPU device.
//!
//! A [`DrmBackend`] owns one privileged-opened GPU device, tracks the
//! display connectors the kernel enumerates on it, and reacts to the
//! asynchronous notifications of the surrounding system: session
//! activation and destruction, kernel device invalidation, display
//! teardown, and the announcement of additional GPUs. All of it runs as
//! synchronous callbacks of the display loop; idempotent teardown and a
//! lifecycle phase checked at every handler substitute for locking.
//!
//! The register-level machinery lives behind collaborator traits:
//! [`session::Session`] (privileged device access),
//! [`scanner::ConnectorScanner`] (connector enumeration and mode
//! commits), [`renderer::RendererFactory`] (rendering context), and
//! [`multi::MultiGpuAggregator`] (composition of several backends).

use serde::Deserialize;

pub mod backend;
pub mod connectors;
pub mod device;
pub mod errors;
pub mod events;
pub mod multi;
pub mod renderer;
pub mod scanner;
pub mod session;

#[cfg(test)]
mod tests;

pub use backend::DrmBackend;

/// Tunables of the DRM backend lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DrmBackendConfig {
    /// Consecutive rescans a connector must be missing from the kernel's
    /// enumeration before its record is removed. Debounces transient
    /// enumeration gaps; a connector that is enumerated but reports no
    /// monitor does not count toward removal.
    pub removal_scan_threshold: u8,

    /// Whether a device-invalidation rescan that leaves every connector
    /// disconnected tears the backend down proactively, releasing kernel
    /// driver resources without waiting for an explicit shutdown.
    pub teardown_when_all_disconnected: bool,
}

impl Default for DrmBackendConfig {
    fn default() -> Self {
        DrmBackendConfig {
            removal_scan_threshold: 2,
            teardown_when_all_disconnected: true,
        }
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config: DrmBackendConfig = toml::from_str("removal_scan_threshold = 3").unwrap();
        assert_eq!(
            config,
            DrmBackendConfig {
                removal_scan_threshold: 3,
                teardown_when_all_disconnected: true,
            }
        );
    }

    #[test]
    fn empty_table_is_the_default() {
        let config: DrmBackendConfig = toml::from_str("").unwrap();
        assert_eq!(config, DrmBackendConfig::default());
    }
}
