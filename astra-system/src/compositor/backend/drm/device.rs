//! The device handle: ownership of one open GPU device descriptor.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use tracing::{debug, warn};

use crate::compositor::backend::drm::session::Session;

/// A shared reference to the open descriptor of a GPU device node.
///
/// The descriptor is opened by the privileged session and stays open until
/// the device handle is closed; clones share the same descriptor so the
/// readiness event source can watch it while the handle owns it.
#[derive(Debug, Clone)]
pub struct DeviceFd(Rc<OwnedFd>);

impl DeviceFd {
    pub fn new(fd: OwnedFd) -> Self {
        DeviceFd(Rc::new(fd))
    }
}

impl From<OwnedFd> for DeviceFd {
    fn from(fd: OwnedFd) -> Self {
        DeviceFd::new(fd)
    }
}

impl AsFd for DeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for DeviceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Driver capability flags queried once by the feature check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Presentation timestamps use the monotonic clock.
    pub timestamp_monotonic: bool,
    /// Atomic mode-setting commits are available.
    pub atomic: bool,
    /// Cursor and overlay planes are exposed as universal planes.
    pub universal_planes: bool,
    /// PRIME buffer import/export is supported.
    pub prime: bool,
    /// Framebuffers can be created with explicit format modifiers.
    pub addfb2_modifiers: bool,
}

impl DriverCapabilities {
    /// The presentation clock implied by these capabilities.
    pub fn presentation_clock(&self) -> ClockId {
        if self.timestamp_monotonic {
            ClockId::Monotonic
        } else {
            ClockId::Realtime
        }
    }
}

/// Identifier of the clock presentation timestamps are reported against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClockId {
    #[default]
    Monotonic,
    Realtime,
}

/// One open GPU device.
///
/// Stores the descriptor handed over by the session, the device node path
/// (for diagnostics), and the capability flags recorded by the feature
/// check. The descriptor and the recorded capabilities never change for
/// the lifetime of the handle; [`close`](DrmDeviceHandle::close) consumes
/// the handle, so returning the descriptor to the session twice is not
/// expressible.
#[derive(Debug)]
pub struct DrmDeviceHandle {
    fd: DeviceFd,
    node_path: PathBuf,
    capabilities: OnceCell<DriverCapabilities>,
}

impl DrmDeviceHandle {
    /// Wraps a descriptor already privileged-opened by the session.
    pub fn new(fd: DeviceFd, node_path: PathBuf) -> Self {
        DrmDeviceHandle {
            fd,
            node_path,
            capabilities: OnceCell::new(),
        }
    }

    pub fn fd(&self) -> &DeviceFd {
        &self.fd
    }

    pub fn node_path(&self) -> &Path {
        &self.node_path
    }

    /// Records the feature-check result. Effective only once.
    pub(crate) fn record_capabilities(&self, capabilities: DriverCapabilities) {
        if self.capabilities.set(capabilities).is_err() {
            warn!(device = %self.node_path.display(), "Driver capabilities recorded twice, keeping the first");
        }
    }

    /// Capability flags, if the feature check has run.
    pub fn capabilities(&self) -> Option<&DriverCapabilities> {
        self.capabilities.get()
    }

    /// The presentation clock of this device.
    ///
    /// Defaults to the monotonic clock until the feature check has run.
    pub fn presentation_clock(&self) -> ClockId {
        self.capabilities
            .get()
            .map(DriverCapabilities::presentation_clock)
            .unwrap_or_default()
    }

    /// Returns the descriptor to the session.
    pub fn close(self, session: &dyn Session) {
        debug!(device = %self.node_path.display(), "Returning DRM device to the session");
        session.close_device(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::os::unix::net::UnixStream;

    fn test_fd() -> DeviceFd {
        let (a, _b) = UnixStream::pair().unwrap();
        DeviceFd::new(a.into())
    }

    #[test]
    fn capabilities_are_recorded_once() {
        let device = DrmDeviceHandle::new(test_fd(), "/dev/dri/card0".into());
        assert_eq!(device.presentation_clock(), ClockId::Monotonic);

        device.record_capabilities(DriverCapabilities {
            timestamp_monotonic: false,
            ..Default::default()
        });
        assert_eq!(device.presentation_clock(), ClockId::Realtime);

        // The second recording does not overwrite the first.
        device.record_capabilities(DriverCapabilities {
            timestamp_monotonic: true,
            ..Default::default()
        });
        assert_eq!(device.presentation_clock(), ClockId::Realtime);
    }

    #[test]
    fn close_hands_the_descriptor_back() {
        use crate::compositor::backend::drm::session::{
            DeviceEvent, GpuEvent, SessionError, SessionEvent,
        };
        use std::path::Path;

        struct CountingSession(Cell<u32>);
        impl Session for CountingSession {
            fn open_device(&self, _path: &Path) -> Result<DeviceFd, SessionError> {
                unimplemented!("not used by this test")
            }
            fn close_device(&self, _fd: DeviceFd) {
                self.0.set(self.0.get() + 1);
            }
            fn is_active(&self) -> bool {
                true
            }
            fn session_events(&self) -> calloop::channel::Channel<SessionEvent> {
                unimplemented!("not used by this test")
            }
            fn device_events(&self, _fd: &DeviceFd) -> calloop::channel::Channel<DeviceEvent> {
                unimplemented!("not used by this test")
            }
            fn gpu_events(&self) -> calloop::channel::Channel<GpuEvent> {
                unimplemented!("not used by this test")
            }
        }

        let session = CountingSession(Cell::new(0));
        let device = DrmDeviceHandle::new(test_fd(), "/dev/dri/card0".into());
        device.close(&session);
        assert_eq!(session.0.get(), 1);
    }
}
