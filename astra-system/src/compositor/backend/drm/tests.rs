//! Backend lifecycle tests driven through a real Calloop dispatch, with
//! scripted session, scanner, renderer, and aggregator collaborators.

use std::cell::{Cell, RefCell};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use calloop::channel;
use pretty_assertions::assert_eq;

use crate::compositor::backend::drm::backend::{DrmBackend, LifecyclePhase};
use crate::compositor::backend::drm::connectors::{ConnectorId, ConnectorState, Mode};
use crate::compositor::backend::drm::device::{DeviceFd, DriverCapabilities, DrmDeviceHandle};
use crate::compositor::backend::drm::errors::{BackendError, InitError};
use crate::compositor::backend::drm::multi::MultiGpuAggregator;
use crate::compositor::backend::drm::renderer::{Renderer, RendererFactory, RendererInitError};
use crate::compositor::backend::drm::scanner::{
    CommitError, ConnectorInfo, ConnectorScanner, ScanError,
};
use crate::compositor::backend::drm::session::{
    DeviceEvent, GpuEvent, Session, SessionError, SessionEvent,
};
use crate::compositor::backend::drm::DrmBackendConfig;
use crate::compositor::backend::CompositorBackend;
use crate::compositor::display_loop::{DisplayLoop, DisplayState};

const MODE: Mode = Mode {
    width: 1920,
    height: 1080,
    refresh_mhz: 60_000,
};

#[derive(Default)]
struct FakeSession {
    closed: Cell<u32>,
    session_senders: RefCell<Vec<channel::Sender<SessionEvent>>>,
    device_senders: RefCell<Vec<channel::Sender<DeviceEvent>>>,
    gpu_senders: RefCell<Vec<channel::Sender<GpuEvent>>>,
}

impl FakeSession {
    fn send_session(&self, event: SessionEvent) -> usize {
        self.session_senders
            .borrow()
            .iter()
            .filter(|s| s.send(event).is_ok())
            .count()
    }

    fn invalidate(&self) {
        for sender in self.device_senders.borrow().iter() {
            let _ = sender.send(DeviceEvent::Invalidated);
        }
    }

    fn announce_gpu(&self, fd: DeviceFd, path: &str) {
        for sender in self.gpu_senders.borrow().iter() {
            let _ = sender.send(GpuEvent::Added {
                fd: fd.clone(),
                path: PathBuf::from(path),
            });
        }
    }
}

impl Session for FakeSession {
    fn open_device(&self, _path: &Path) -> Result<DeviceFd, SessionError> {
        unimplemented!("backends under test receive descriptors directly")
    }

    fn close_device(&self, _fd: DeviceFd) {
        self.closed.set(self.closed.get() + 1);
    }

    fn is_active(&self) -> bool {
        true
    }

    fn session_events(&self) -> channel::Channel<SessionEvent> {
        let (sender, receiver) = channel::channel();
        self.session_senders.borrow_mut().push(sender);
        receiver
    }

    fn device_events(&self, _fd: &DeviceFd) -> channel::Channel<DeviceEvent> {
        let (sender, receiver) = channel::channel();
        self.device_senders.borrow_mut().push(sender);
        receiver
    }

    fn gpu_events(&self) -> channel::Channel<GpuEvent> {
        let (sender, receiver) = channel::channel();
        self.gpu_senders.borrow_mut().push(sender);
        receiver
    }
}

#[derive(Default)]
struct FakeScanner {
    capabilities: Cell<DriverCapabilities>,
    fail_check: Cell<bool>,
    fail_init: Cell<bool>,
    scan_result: RefCell<Vec<ConnectorInfo>>,
    applied: RefCell<Vec<(ConnectorId, Option<Mode>)>>,
    resources_finished: Cell<u32>,
}

impl FakeScanner {
    fn present(&self, id: u32, name: &str) {
        self.scan_result.borrow_mut().push(ConnectorInfo {
            id: ConnectorId(id),
            name: name.to_string(),
            connected: true,
            current_mode: None,
        });
    }

    fn clear(&self) {
        self.scan_result.borrow_mut().clear();
    }
}

impl ConnectorScanner for FakeScanner {
    fn check_features(&self, _: &DrmDeviceHandle) -> Result<DriverCapabilities, ScanError> {
        if self.fail_check.get() {
            Err(ScanError::Capabilities("scripted failure".into()))
        } else {
            Ok(self.capabilities.get())
        }
    }

    fn init_resources(&self, _: &DrmDeviceHandle) -> Result<(), ScanError> {
        if self.fail_init.get() {
            Err(ScanError::Resources("scripted failure".into()))
        } else {
            Ok(())
        }
    }

    fn finish_resources(&self, _: &DrmDeviceHandle) {
        self.resources_finished.set(self.resources_finished.get() + 1);
    }

    fn scan(&self, _: &DrmDeviceHandle) -> Result<Vec<ConnectorInfo>, ScanError> {
        Ok(self.scan_result.borrow().clone())
    }

    fn apply_mode(
        &self,
        _: &DrmDeviceHandle,
        connector: ConnectorId,
        mode: Option<&Mode>,
    ) -> Result<(), CommitError> {
        self.applied.borrow_mut().push((connector, mode.copied()));
        Ok(())
    }

    fn process_events(&self, _: &DrmDeviceHandle) -> Result<(), ScanError> {
        Ok(())
    }
}

struct FakeRenderer;

impl Renderer for FakeRenderer {
    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Default)]
struct FakeRendererFactory {
    fail: Cell<bool>,
}

impl RendererFactory for FakeRendererFactory {
    fn create_renderer(&self, _: &DrmDeviceHandle) -> Result<Rc<dyn Renderer>, RendererInitError> {
        if self.fail.get() {
            Err(RendererInitError("scripted failure".into()))
        } else {
            Ok(Rc::new(FakeRenderer))
        }
    }
}

#[derive(Default)]
struct FakeAggregator {
    accept: Cell<bool>,
    backends: RefCell<Vec<Rc<dyn CompositorBackend>>>,
}

impl MultiGpuAggregator for FakeAggregator {
    fn add_backend(&self, backend: Rc<dyn CompositorBackend>) -> bool {
        if self.accept.get() {
            self.backends.borrow_mut().push(backend);
            true
        } else {
            false
        }
    }
}

struct Harness {
    display: DisplayLoop,
    state: DisplayState,
    session: Rc<FakeSession>,
    scanner: Rc<FakeScanner>,
    factory: FakeRendererFactory,
    // Peer ends of the device descriptors, kept open for the tests'
    // duration.
    peers: RefCell<Vec<UnixStream>>,
}

impl Harness {
    fn new() -> Self {
        Harness {
            display: DisplayLoop::new().unwrap(),
            state: DisplayState::default(),
            session: Rc::new(FakeSession::default()),
            scanner: Rc::new(FakeScanner::default()),
            factory: FakeRendererFactory::default(),
            peers: RefCell::new(Vec::new()),
        }
    }

    fn device_fd(&self) -> DeviceFd {
        let (a, b) = UnixStream::pair().unwrap();
        self.peers.borrow_mut().push(b);
        DeviceFd::new(a.into())
    }

    fn create_backend(&self) -> Result<Rc<DrmBackend>, BackendError> {
        DrmBackend::create(
            &self.display.handle(),
            self.session.clone(),
            self.scanner.clone(),
            self.device_fd(),
            PathBuf::from("/dev/dri/card0"),
            None,
            Some(&self.factory),
            DrmBackendConfig::default(),
        )
    }

    fn dispatch(&mut self) {
        self.display
            .dispatch(Some(Duration::from_millis(10)), &mut self.state)
            .unwrap();
    }
}

#[test]
fn create_produces_a_running_primary_backend() {
    let h = Harness::new();
    let backend = h.create_backend().unwrap();

    assert_eq!(backend.phase(), LifecyclePhase::Running);
    assert!(backend.is_primary());
    assert!(backend.renderer().is_some());
    assert_eq!(h.session.closed.get(), 0);
}

#[test]
fn start_scans_and_reports_connectors() {
    let h = Harness::new();
    h.scanner.present(1, "DP-1");
    let backend = h.create_backend().unwrap();

    let added = Rc::new(Cell::new(0u32));
    let a = added.clone();
    backend.events().connector_added.listen(move |_| a.set(a.get() + 1));

    assert!(backend.start());
    let connectors = backend.connectors();
    assert_eq!(connectors.len(), 1);
    assert_eq!(connectors[0].state, ConnectorState::ConnectedDisabled);
    assert_eq!(added.get(), 1);
}

#[test]
fn start_fails_once_destroyed() {
    let h = Harness::new();
    let backend = h.create_backend().unwrap();
    backend.destroy();
    assert!(!backend.start());
}

#[test]
fn destroy_is_idempotent_across_all_trigger_paths() {
    let mut h = Harness::new();
    let backend = h.create_backend().unwrap();

    let destroyed = Rc::new(Cell::new(0u32));
    let d = destroyed.clone();
    backend.events().destroyed.listen(move |_| d.set(d.get() + 1));

    backend.destroy();
    backend.destroy();
    h.session.send_session(SessionEvent::Destroyed);
    h.dispatch();
    h.display.signal_teardown();

    assert_eq!(destroyed.get(), 1);
    assert_eq!(backend.phase(), LifecyclePhase::Destroyed);
    assert_eq!(h.session.closed.get(), 1);
    assert_eq!(h.scanner.resources_finished.get(), 1);
}

#[test]
fn session_destruction_tears_the_backend_down() {
    let mut h = Harness::new();
    let backend = h.create_backend().unwrap();

    h.session.send_session(SessionEvent::Destroyed);
    h.dispatch();

    assert_eq!(backend.phase(), LifecyclePhase::Destroyed);
    assert_eq!(h.session.closed.get(), 1);
}

#[test]
fn display_teardown_tears_the_backend_down() {
    let h = Harness::new();
    let backend = h.create_backend().unwrap();

    h.display.signal_teardown();

    assert_eq!(backend.phase(), LifecyclePhase::Destroyed);
    assert_eq!(h.session.closed.get(), 1);
}

#[test]
fn destroy_drains_connectors_and_restores_their_configuration() {
    let h = Harness::new();
    h.scanner.scan_result.borrow_mut().push(ConnectorInfo {
        id: ConnectorId(1),
        name: "DP-1".into(),
        connected: true,
        current_mode: Some(MODE),
    });
    let backend = h.create_backend().unwrap();
    backend.start();

    let removed = Rc::new(Cell::new(0u32));
    let r = removed.clone();
    backend
        .events()
        .connector_removed
        .listen(move |_| r.set(r.get() + 1));

    h.scanner.applied.borrow_mut().clear();
    backend.destroy();

    assert_eq!(removed.get(), 1);
    assert!(backend.connectors().is_empty());
    // The pre-existing configuration was committed back.
    assert_eq!(
        h.scanner.applied.borrow().as_slice(),
        &[(ConnectorId(1), Some(MODE))]
    );
}

#[test]
fn destroyed_fires_while_backend_state_is_still_readable() {
    let h = Harness::new();
    let backend = h.create_backend().unwrap();

    let weak = Rc::downgrade(&backend);
    let renderer_present = Rc::new(Cell::new(false));
    let rp = renderer_present.clone();
    backend.events().destroyed.listen(move |_| {
        if let Some(backend) = weak.upgrade() {
            rp.set(backend.renderer().is_some());
        }
    });

    backend.destroy();
    assert!(renderer_present.get());
    assert!(backend.renderer().is_none());
}

#[test]
fn event_sources_are_unregistered_by_destroy() {
    let mut h = Harness::new();
    let backend = h.create_backend().unwrap();
    assert_eq!(h.session.send_session(SessionEvent::Paused), 1);
    h.dispatch();

    backend.destroy();
    // Source teardown completes on the next dispatch.
    h.dispatch();
    assert_eq!(h.session.send_session(SessionEvent::Paused), 0);
}

#[test]
fn feature_check_failure_rolls_back_creation() {
    let mut h = Harness::new();
    h.scanner.fail_check.set(true);

    let err = h.create_backend().unwrap_err();
    assert!(matches!(
        err,
        BackendError::Init(InitError::FeatureCheck(_))
    ));
    assert_eq!(h.session.closed.get(), 1);
    // Resource tracking never started, so it is not torn down.
    assert_eq!(h.scanner.resources_finished.get(), 0);

    h.dispatch();
    assert_eq!(h.session.send_session(SessionEvent::Paused), 0);
}

#[test]
fn resource_failure_rolls_back_creation() {
    let h = Harness::new();
    h.scanner.fail_init.set(true);

    let err = h.create_backend().unwrap_err();
    assert!(matches!(err, BackendError::Init(InitError::Resources(_))));
    assert_eq!(h.session.closed.get(), 1);
    assert_eq!(h.scanner.resources_finished.get(), 0);
}

#[test]
fn renderer_failure_rolls_back_resources_too() {
    let h = Harness::new();
    h.factory.fail.set(true);

    let err = h.create_backend().unwrap_err();
    assert!(matches!(err, BackendError::Init(InitError::Renderer(_))));
    assert_eq!(h.session.closed.get(), 1);
    assert_eq!(h.scanner.resources_finished.get(), 1);
}

#[test]
fn primary_backend_requires_a_renderer_factory() {
    let h = Harness::new();
    let err = DrmBackend::create(
        &h.display.handle(),
        h.session.clone(),
        h.scanner.clone(),
        h.device_fd(),
        PathBuf::from("/dev/dri/card0"),
        None,
        None,
        DrmBackendConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        BackendError::Init(InitError::NoRendererFactory)
    ));
    assert_eq!(h.session.closed.get(), 1);
}

#[test]
fn invalidation_rescan_discovers_hotplug() {
    let mut h = Harness::new();
    let backend = h.create_backend().unwrap();
    backend.start();
    assert!(backend.connectors().is_empty());

    h.scanner.present(1, "DP-1");
    // One connector is connected, so the backend keeps running.
    h.session.invalidate();
    h.dispatch();

    assert_eq!(backend.phase(), LifecyclePhase::Running);
    assert_eq!(backend.connectors().len(), 1);
}

#[test]
fn invalidation_with_every_connector_gone_tears_down() {
    let mut h = Harness::new();
    h.scanner.present(1, "DP-1");
    let backend = h.create_backend().unwrap();
    backend.start();

    h.scanner.clear();
    h.session.invalidate();
    h.dispatch();

    assert_eq!(backend.phase(), LifecyclePhase::Destroyed);
    assert_eq!(h.session.closed.get(), 1);
}

#[test]
fn all_disconnected_teardown_can_be_disabled() {
    let mut h = Harness::new();
    h.scanner.present(1, "DP-1");
    let backend = DrmBackend::create(
        &h.display.handle(),
        h.session.clone(),
        h.scanner.clone(),
        h.device_fd(),
        PathBuf::from("/dev/dri/card0"),
        None,
        Some(&h.factory),
        DrmBackendConfig {
            teardown_when_all_disconnected: false,
            ..Default::default()
        },
    )
    .unwrap();
    backend.start();

    h.scanner.clear();
    h.session.invalidate();
    h.dispatch();

    assert_eq!(backend.phase(), LifecyclePhase::Running);
}

#[test]
fn session_resume_reapplies_recorded_intent() {
    let mut h = Harness::new();
    h.scanner.present(1, "DP-1");
    h.scanner.present(2, "HDMI-A-1");
    let backend = h.create_backend().unwrap();
    backend.start();
    backend.set_connector_mode(ConnectorId(1), Some(MODE)).unwrap();

    h.session.send_session(SessionEvent::Paused);
    h.dispatch();
    assert_eq!(backend.phase(), LifecyclePhase::Running);

    h.scanner.applied.borrow_mut().clear();
    h.session.send_session(SessionEvent::Activated);
    h.dispatch();

    let applied = h.scanner.applied.borrow();
    assert!(applied.contains(&(ConnectorId(1), Some(MODE))));
    assert!(applied.contains(&(ConnectorId(2), None)));
}

#[test]
fn presentation_clock_follows_capabilities_and_survives_destroy() {
    let h = Harness::new();
    h.scanner.capabilities.set(DriverCapabilities {
        timestamp_monotonic: false,
        ..Default::default()
    });
    let backend = h.create_backend().unwrap();

    use crate::compositor::backend::drm::device::ClockId;
    assert_eq!(backend.presentation_clock(), ClockId::Realtime);
    backend.destroy();
    assert_eq!(backend.presentation_clock(), ClockId::Realtime);
}

#[test]
fn announced_gpu_becomes_a_child_borrowing_the_parent_renderer() {
    let mut h = Harness::new();
    let parent = h.create_backend().unwrap();
    let agg = Rc::new(FakeAggregator::default());
    agg.accept.set(true);
    parent.set_aggregator(&(agg.clone() as Rc<dyn MultiGpuAggregator>));

    h.session.announce_gpu(h.device_fd(), "/dev/dri/card1");
    h.dispatch();

    let backends = agg.backends.borrow();
    assert_eq!(backends.len(), 1);
    let child_renderer = backends[0].renderer().unwrap();
    let parent_renderer = parent.renderer().unwrap();
    assert!(Rc::ptr_eq(&child_renderer, &parent_renderer));
}

#[test]
fn rejected_secondary_backend_is_destroyed() {
    let mut h = Harness::new();
    let parent = h.create_backend().unwrap();
    let agg = Rc::new(FakeAggregator::default());
    parent.set_aggregator(&(agg.clone() as Rc<dyn MultiGpuAggregator>));

    h.session.announce_gpu(h.device_fd(), "/dev/dri/card1");
    h.dispatch();

    assert!(agg.backends.borrow().is_empty());
    // The child's descriptor went back to the session.
    assert_eq!(h.session.closed.get(), 1);
    assert_eq!(parent.phase(), LifecyclePhase::Running);
}

#[test]
fn announced_gpu_without_an_aggregator_is_destroyed() {
    let mut h = Harness::new();
    let parent = h.create_backend().unwrap();

    h.session.announce_gpu(h.device_fd(), "/dev/dri/card1");
    h.dispatch();

    assert_eq!(h.session.closed.get(), 1);
    assert_eq!(parent.phase(), LifecyclePhase::Running);
}

#[test]
fn failing_secondary_creation_leaves_the_parent_running() {
    let mut h = Harness::new();
    let parent = h.create_backend().unwrap();
    let agg = Rc::new(FakeAggregator::default());
    agg.accept.set(true);
    parent.set_aggregator(&(agg.clone() as Rc<dyn MultiGpuAggregator>));

    h.scanner.fail_check.set(true);
    h.session.announce_gpu(h.device_fd(), "/dev/dri/card1");
    h.dispatch();

    assert!(agg.backends.borrow().is_empty());
    assert_eq!(h.session.closed.get(), 1);
    assert_eq!(parent.phase(), LifecyclePhase::Running);
}

#[test]
fn teardown_destroys_parent_and_child() {
    let mut h = Harness::new();
    let parent = h.create_backend().unwrap();
    let agg = Rc::new(FakeAggregator::default());
    agg.accept.set(true);
    parent.set_aggregator(&(agg.clone() as Rc<dyn MultiGpuAggregator>));

    h.session.announce_gpu(h.device_fd(), "/dev/dri/card1");
    h.dispatch();
    assert_eq!(agg.backends.borrow().len(), 1);

    h.display.signal_teardown();

    assert_eq!(parent.phase(), LifecyclePhase::Destroyed);
    // Both descriptors returned.
    assert_eq!(h.session.closed.get(), 2);
}
