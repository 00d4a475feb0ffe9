//! Connector tracking: discovery, the per-connector state machine, mode
//! application, and restoration of the pre-compositor configuration.
//!
//! Rescanning is the single authoritative way hotplug changes are
//! discovered. A rescan diffs the kernel's enumeration against the tracked
//! records: newly enumerated connectors get a record (entering
//! [`ConnectorState::Disconnected`] and being re-evaluated immediately),
//! vanished ones are counted toward debounced removal, and connectors the
//! scan does not affect keep their state untouched.

use std::fmt;

use tracing::{debug, info, warn};

use crate::compositor::backend::drm::device::DrmDeviceHandle;
use crate::compositor::backend::drm::events::ConnectorEvent;
use crate::compositor::backend::drm::scanner::{CommitError, ConnectorInfo, ConnectorScanner, ScanError};

/// Kernel object id of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectorId(pub u32);

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connector-{}", self.0)
    }
}

/// A timing/resolution configuration applied to a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    /// Vertical refresh rate in millihertz.
    pub refresh_mhz: u32,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}.{:03}Hz",
            self.width,
            self.height,
            self.refresh_mhz / 1000,
            self.refresh_mhz % 1000
        )
    }
}

/// Lifecycle state of one connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No monitor present. Initial state of every record.
    Disconnected,
    /// Monitor present, no mode applied.
    ConnectedDisabled,
    /// Mode applied and active.
    ConnectedEnabled,
}

#[derive(Debug)]
struct DrmConnector {
    id: ConnectorId,
    name: String,
    state: ConnectorState,
    current_mode: Option<Mode>,
    desired_mode: Option<Mode>,
    enabled: bool,
    /// Configuration observed when the connector was first enumerated,
    /// re-applied by [`ConnectorSet::restore_all`] at teardown.
    saved_mode: Option<Mode>,
    /// Consecutive rescans the kernel did not enumerate this connector.
    missed_scans: u8,
}

impl DrmConnector {
    fn new(info: &ConnectorInfo) -> Self {
        DrmConnector {
            id: info.id,
            name: info.name.clone(),
            state: ConnectorState::Disconnected,
            current_mode: None,
            desired_mode: None,
            enabled: false,
            saved_mode: info.current_mode,
            missed_scans: 0,
        }
    }

    fn mark_disconnected(&mut self) {
        self.state = ConnectorState::Disconnected;
        self.current_mode = None;
        self.enabled = false;
    }

    fn event(&self) -> ConnectorEvent {
        ConnectorEvent {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Read-only view of one tracked connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSnapshot {
    pub id: ConnectorId,
    pub name: String,
    pub state: ConnectorState,
    pub current_mode: Option<Mode>,
    pub desired_mode: Option<Mode>,
    pub enabled: bool,
}

/// What one rescan changed.
///
/// Add/remove notifications are returned to the caller instead of being
/// emitted here, so they can be delivered after the set's borrow is
/// released.
#[derive(Debug, Default)]
pub struct RescanOutcome {
    pub added: Vec<ConnectorEvent>,
    pub removed: Vec<ConnectorEvent>,
    /// True when every remaining record (or none at all) is
    /// [`ConnectorState::Disconnected`].
    pub all_disconnected: bool,
}

/// The ordered set of connectors tracked on one device.
#[derive(Debug)]
pub struct ConnectorSet {
    connectors: Vec<DrmConnector>,
    removal_scan_threshold: u8,
}

impl ConnectorSet {
    pub fn new(removal_scan_threshold: u8) -> Self {
        ConnectorSet {
            connectors: Vec::new(),
            // A threshold of zero would remove a connector the moment a
            // single enumeration misses it.
            removal_scan_threshold: removal_scan_threshold.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// True when every record (or none at all) is disconnected.
    pub fn all_disconnected(&self) -> bool {
        self.connectors
            .iter()
            .all(|c| c.state == ConnectorState::Disconnected)
    }

    pub fn snapshots(&self) -> Vec<ConnectorSnapshot> {
        self.connectors
            .iter()
            .map(|c| ConnectorSnapshot {
                id: c.id,
                name: c.name.clone(),
                state: c.state,
                current_mode: c.current_mode,
                desired_mode: c.desired_mode,
                enabled: c.enabled,
            })
            .collect()
    }

    pub fn get(&self, id: ConnectorId) -> Option<ConnectorSnapshot> {
        self.snapshots().into_iter().find(|c| c.id == id)
    }

    /// Diffs the kernel's enumeration against the tracked records.
    pub fn rescan(
        &mut self,
        scanner: &dyn ConnectorScanner,
        device: &DrmDeviceHandle,
    ) -> Result<RescanOutcome, ScanError> {
        let infos = scanner.scan(device)?;
        let mut outcome = RescanOutcome::default();

        for info in &infos {
            let index = match self.connectors.iter().position(|c| c.id == info.id) {
                Some(index) => {
                    self.connectors[index].missed_scans = 0;
                    index
                }
                None => {
                    debug!(connector = %info.name, "Discovered connector");
                    let conn = DrmConnector::new(info);
                    outcome.added.push(conn.event());
                    self.connectors.push(conn);
                    self.connectors.len() - 1
                }
            };
            self.evaluate_presence(scanner, device, index, info);
        }

        // Records the kernel no longer enumerates: disconnect immediately,
        // remove only once absence is confirmed across enough scans.
        let threshold = self.removal_scan_threshold;
        let removed = &mut outcome.removed;
        self.connectors.retain_mut(|conn| {
            if infos.iter().any(|i| i.id == conn.id) {
                return true;
            }
            conn.missed_scans = conn.missed_scans.saturating_add(1);
            if conn.state != ConnectorState::Disconnected {
                debug!(connector = %conn.name, "Connector no longer enumerated");
                conn.mark_disconnected();
            }
            if conn.missed_scans >= threshold {
                info!(connector = %conn.name, "Connector confirmed gone, removing");
                removed.push(conn.event());
                false
            } else {
                true
            }
        });

        outcome.all_disconnected = self.all_disconnected();
        Ok(outcome)
    }

    fn evaluate_presence(
        &mut self,
        scanner: &dyn ConnectorScanner,
        device: &DrmDeviceHandle,
        index: usize,
        info: &ConnectorInfo,
    ) {
        let conn = &mut self.connectors[index];
        if info.connected {
            // Presence only moves a disconnected record; connectors the
            // scan does not affect keep their state.
            if conn.state == ConnectorState::Disconnected {
                match conn.desired_mode {
                    Some(mode) => match scanner.apply_mode(device, conn.id, Some(&mode)) {
                        Ok(()) => {
                            debug!(connector = %conn.name, %mode, "Re-applied desired mode");
                            conn.current_mode = Some(mode);
                            conn.enabled = true;
                            conn.state = ConnectorState::ConnectedEnabled;
                        }
                        Err(e) => {
                            warn!(connector = %conn.name, error = %e, "Failed to re-apply desired mode, leaving disabled");
                            conn.current_mode = None;
                            conn.enabled = false;
                            conn.state = ConnectorState::ConnectedDisabled;
                        }
                    },
                    None => {
                        debug!(connector = %conn.name, "Monitor present");
                        conn.state = ConnectorState::ConnectedDisabled;
                    }
                }
            }
        } else if conn.state != ConnectorState::Disconnected {
            debug!(connector = %conn.name, "Monitor gone");
            conn.mark_disconnected();
        }
    }

    /// Applies a mode to a connector, or disables it with `None`.
    ///
    /// Updates both the current and the desired mode. A failed commit
    /// leaves the connector disabled and is surfaced to the caller, who is
    /// expected to log and carry on.
    pub fn set_mode(
        &mut self,
        scanner: &dyn ConnectorScanner,
        device: &DrmDeviceHandle,
        id: ConnectorId,
        mode: Option<Mode>,
    ) -> Result<(), CommitError> {
        let Some(conn) = self.connectors.iter_mut().find(|c| c.id == id) else {
            warn!(%id, "set_mode on untracked connector, ignoring");
            return Ok(());
        };

        match mode {
            Some(mode) => {
                conn.desired_mode = Some(mode);
                match scanner.apply_mode(device, id, Some(&mode)) {
                    Ok(()) => {
                        info!(connector = %conn.name, %mode, "Mode applied");
                        conn.current_mode = Some(mode);
                        conn.enabled = true;
                        conn.state = ConnectorState::ConnectedEnabled;
                        Ok(())
                    }
                    Err(e) => {
                        warn!(connector = %conn.name, %mode, error = %e, "Mode commit failed, connector left disabled");
                        conn.current_mode = None;
                        conn.enabled = false;
                        conn.state = ConnectorState::ConnectedDisabled;
                        Err(e)
                    }
                }
            }
            None => {
                conn.desired_mode = None;
                if let Err(e) = scanner.apply_mode(device, id, None) {
                    warn!(connector = %conn.name, error = %e, "Disabling connector failed");
                }
                conn.current_mode = None;
                conn.enabled = false;
                if conn.state == ConnectorState::ConnectedEnabled {
                    conn.state = ConnectorState::ConnectedDisabled;
                }
                Ok(())
            }
        }
    }

    /// Reverts every connector to the configuration observed before the
    /// backend took control. Used only during full teardown; commit
    /// failures are logged and ignored.
    pub fn restore_all(&self, scanner: &dyn ConnectorScanner, device: &DrmDeviceHandle) {
        debug!(device = %device.node_path().display(), "Restoring pre-compositor output configuration");
        for conn in &self.connectors {
            if let Err(e) = scanner.apply_mode(device, conn.id, conn.saved_mode.as_ref()) {
                warn!(connector = %conn.name, error = %e, "Failed to restore original configuration");
            }
        }
    }

    /// Removes every record, returning the corresponding notifications.
    pub fn drain(&mut self) -> Vec<ConnectorEvent> {
        self.connectors.drain(..).map(|c| c.event()).collect()
    }
}
