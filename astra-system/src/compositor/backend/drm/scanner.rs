//! Interface to the connector-scanning and mode-setting collaborator.
//!
//! Everything register-level lives behind this trait: enumerating the
//! kernel's connector objects, querying driver capabilities, tracking
//! CRTC/plane resources, issuing atomic commits, and draining the events
//! the device descriptor signals readiness for. The backend core only
//! orchestrates the calls.

use thiserror::Error;

use crate::compositor::backend::drm::connectors::{ConnectorId, Mode};
use crate::compositor::backend::drm::device::{DriverCapabilities, DrmDeviceHandle};

/// One connector as the kernel enumerates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    /// Kernel object id, stable while the connector is enumerated.
    pub id: ConnectorId,
    /// Stable human-readable name, e.g. `DP-1`.
    pub name: String,
    /// Whether a monitor is attached.
    pub connected: bool,
    /// The mode found applied when the connector was enumerated, if any.
    /// Used to restore the pre-compositor configuration at teardown.
    pub current_mode: Option<Mode>,
}

/// Errors of the scanning collaborator.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("connector enumeration failed: {0}")]
    Enumeration(String),

    #[error("device capability query failed: {0}")]
    Capabilities(String),

    #[error("kernel resource tracking failed: {0}")]
    Resources(String),

    #[error("device event dispatch failed: {0}")]
    EventDispatch(String),
}

/// A mode-apply attempt failed. The affected connector is left disabled;
/// the backend keeps running.
#[derive(Debug, Error)]
#[error("mode commit failed on {connector}: {reason}")]
pub struct CommitError {
    pub connector: String,
    pub reason: String,
}

/// The connector-scan collaborator.
pub trait ConnectorScanner {
    /// Queries the capability flags the backend requires.
    fn check_features(&self, device: &DrmDeviceHandle) -> Result<DriverCapabilities, ScanError>;

    /// Starts tracking the device's CRTC/plane resources.
    fn init_resources(&self, device: &DrmDeviceHandle) -> Result<(), ScanError>;

    /// Releases the resource tracking started by
    /// [`init_resources`](ConnectorScanner::init_resources).
    fn finish_resources(&self, device: &DrmDeviceHandle);

    /// Enumerates the device's connectors.
    ///
    /// This is the single authoritative way hotplug changes are
    /// discovered; it must be safe to call repeatedly.
    fn scan(&self, device: &DrmDeviceHandle) -> Result<Vec<ConnectorInfo>, ScanError>;

    /// Applies a mode to a connector, or disables it when `mode` is `None`.
    fn apply_mode(
        &self,
        device: &DrmDeviceHandle,
        connector: ConnectorId,
        mode: Option<&Mode>,
    ) -> Result<(), CommitError>;

    /// Drains pending kernel events after the device descriptor signalled
    /// readiness.
    fn process_events(&self, device: &DrmDeviceHandle) -> Result<(), ScanError>;
}
