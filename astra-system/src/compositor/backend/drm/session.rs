//! Interface to the privileged session collaborator.
//!
//! The session owns arbitrated access to raw device descriptors (across
//! virtual-terminal switches) and is the source of three notification
//! streams: session-level events, per-device invalidation events, and the
//! announcement of additional GPUs. Notifications are delivered as Calloop
//! channels so they dispatch on the display loop like every other event
//! source; a fresh channel is handed out per subscription, and dropping
//! the receiving source is the unsubscription.

use std::io;
use std::path::{Path, PathBuf};

use calloop::channel::Channel;
use thiserror::Error;

use crate::compositor::backend::drm::device::DeviceFd;

/// Session-level notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session gained device access (e.g. the virtual terminal was
    /// switched back to the compositor).
    Activated,
    /// The session lost device access. Mode changes are meaningless until
    /// the next [`SessionEvent::Activated`].
    Paused,
    /// The session itself is going away.
    Destroyed,
}

/// Per-device notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The kernel signalled that the device node changed, e.g. after a
    /// resource-control revocation or a driver reset. Distinct from
    /// per-connector hotplug.
    Invalidated,
}

/// Announcement of an additional GPU made available to the session.
#[derive(Debug)]
pub enum GpuEvent {
    /// A secondary GPU appeared; the descriptor is already
    /// privileged-opened by the session.
    Added { fd: DeviceFd, path: PathBuf },
}

/// Errors surfaced by the session collaborator.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The device descriptor could not be acquired. Fatal to the backend
    /// being created on it, not to the process.
    #[error("failed to open device {path:?}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The session has no device access at the moment.
    #[error("session is not active")]
    NotActive,
}

/// The privileged session.
pub trait Session {
    /// Opens a device node with session privileges.
    fn open_device(&self, path: &Path) -> Result<DeviceFd, SessionError>;

    /// Returns a previously opened descriptor to the session.
    fn close_device(&self, fd: DeviceFd);

    /// Whether the session currently has device access.
    fn is_active(&self) -> bool;

    /// Subscribes to session-level events.
    fn session_events(&self) -> Channel<SessionEvent>;

    /// Subscribes to invalidation events for one device.
    fn device_events(&self, fd: &DeviceFd) -> Channel<DeviceEvent>;

    /// Subscribes to secondary-GPU announcements.
    fn gpu_events(&self) -> Channel<GpuEvent>;
}
