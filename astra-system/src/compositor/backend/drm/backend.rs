//! The DRM backend lifecycle controller.
//!
//! One [`DrmBackend`] per GPU device. Construction registers the event
//! bindings, runs the feature check, and initializes resource tracking and
//! the renderer, rolling back exactly the registrations already made if
//! any step fails. Destruction is idempotent: the explicit caller, the
//! session-destroy notification, and the display-teardown notification may
//! all request it, and the lifecycle phase guarantees at-most-once
//! teardown without locks, since everything here runs as synchronous
//! callbacks of one event loop.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use calloop::channel;
use calloop::generic::Generic;
use calloop::{Interest, PostAction};
use tracing::{debug, error, info, trace, warn};

use crate::compositor::backend::drm::connectors::{
    ConnectorId, ConnectorSet, ConnectorSnapshot, Mode, RescanOutcome,
};
use crate::compositor::backend::drm::device::{ClockId, DeviceFd, DrmDeviceHandle};
use crate::compositor::backend::drm::errors::{BackendError, InitError};
use crate::compositor::backend::drm::events::{BackendEvents, EventBindings};
use crate::compositor::backend::drm::multi::{MultiGpuAggregator, MultiGpuError};
use crate::compositor::backend::drm::renderer::{Renderer, RendererFactory};
use crate::compositor::backend::drm::scanner::{CommitError, ConnectorScanner, ScanError};
use crate::compositor::backend::drm::session::{DeviceEvent, GpuEvent, Session, SessionEvent};
use crate::compositor::backend::drm::DrmBackendConfig;
use crate::compositor::backend::CompositorBackend;
use crate::compositor::display_loop::DisplayHandle;

/// Lifecycle phase of a backend.
///
/// Checked at the start of every event handler: once the backend is
/// `Destroying` or `Destroyed`, every further handler and destroy request
/// short-circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Creating,
    Running,
    Destroying,
    Destroyed,
}

/// The backend managing one GPU device.
pub struct DrmBackend {
    display: DisplayHandle,
    session: Rc<dyn Session>,
    scanner: Rc<dyn ConnectorScanner>,
    config: DrmBackendConfig,
    node_path: PathBuf,
    device: RefCell<Option<DrmDeviceHandle>>,
    connectors: RefCell<ConnectorSet>,
    /// Populated on primary backends only; children resolve through
    /// `parent`.
    renderer: RefCell<Option<Rc<dyn Renderer>>>,
    /// Set on child backends opened for a secondary GPU. Non-owning: the
    /// aggregator holds the strong references and must keep the parent
    /// alive for as long as any child exists.
    parent: Option<Weak<DrmBackend>>,
    aggregator: RefCell<Option<Weak<dyn MultiGpuAggregator>>>,
    events: BackendEvents,
    bindings: RefCell<EventBindings>,
    phase: Cell<LifecyclePhase>,
    clock: Cell<ClockId>,
    resources_initialized: Cell<bool>,
}

impl DrmBackend {
    /// Creates a backend on a device descriptor already opened by the
    /// session.
    ///
    /// `parent` is set when the device is a secondary GPU opened on behalf
    /// of a primary backend; the child then borrows the parent's renderer
    /// and `renderer_factory` may be `None`. The caller (in practice the
    /// aggregator) must not drop a parent while children reference it.
    ///
    /// On failure every event-source registration made so far is undone in
    /// reverse order and the descriptor is returned to the session.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        display: &DisplayHandle,
        session: Rc<dyn Session>,
        scanner: Rc<dyn ConnectorScanner>,
        fd: DeviceFd,
        node_path: PathBuf,
        parent: Option<&Rc<DrmBackend>>,
        renderer_factory: Option<&dyn RendererFactory>,
        config: DrmBackendConfig,
    ) -> Result<Rc<DrmBackend>, BackendError> {
        info!(device = %node_path.display(), primary = parent.is_none(), "Initializing DRM backend");
        if !session.is_active() {
            warn!(device = %node_path.display(), "Session is inactive; mode commits will fail until it resumes");
        }

        let device = DrmDeviceHandle::new(fd, node_path.clone());
        let backend = Rc::new(DrmBackend {
            display: display.clone(),
            session,
            scanner,
            connectors: RefCell::new(ConnectorSet::new(config.removal_scan_threshold)),
            config,
            node_path,
            device: RefCell::new(None),
            renderer: RefCell::new(None),
            parent: parent.map(Rc::downgrade),
            aggregator: RefCell::new(None),
            events: BackendEvents::default(),
            bindings: RefCell::new(EventBindings::default()),
            phase: Cell::new(LifecyclePhase::Creating),
            clock: Cell::new(ClockId::default()),
            resources_initialized: Cell::new(false),
        });

        if let Err(err) = backend.initialize(&device, parent.is_some(), renderer_factory) {
            warn!(device = %backend.node_path.display(), error = %err, "DRM backend initialization failed, rolling back");
            backend.roll_back_creation(device);
            return Err(BackendError::Init(err));
        }

        // The handle is stored only once every construction step
        // succeeded; the event-source callbacks cannot run before
        // `create` returns.
        *backend.device.borrow_mut() = Some(device);
        backend.phase.set(LifecyclePhase::Running);
        debug!(device = %backend.node_path.display(), "DRM backend running");
        Ok(backend)
    }

    /// Registers the event bindings and runs the fallible construction
    /// steps, in the order the rollback unwinds against.
    fn initialize(
        self: &Rc<Self>,
        device: &DrmDeviceHandle,
        has_parent: bool,
        renderer_factory: Option<&dyn RendererFactory>,
    ) -> Result<(), InitError> {
        let loop_handle = self.display.loop_handle().clone();

        // Device-invalidation notifications from the session.
        let weak = Rc::downgrade(self);
        let token = loop_handle
            .insert_source(self.session.device_events(device.fd()), move |event, _, _| {
                if let channel::Event::Msg(DeviceEvent::Invalidated) = event {
                    if let Some(backend) = weak.upgrade() {
                        backend.handle_device_invalidated();
                    }
                }
            })
            .map_err(|e| InitError::Registration(e.error))?;
        self.bindings.borrow_mut().push_source("device-invalidation", token);

        // Readiness on the device descriptor.
        let weak = Rc::downgrade(self);
        let source: Generic<DeviceFd> =
            Generic::new(device.fd().clone(), Interest::READ, calloop::Mode::Level);
        let token = loop_handle
            .insert_source(source, move |_, _, _| {
                if let Some(backend) = weak.upgrade() {
                    backend.handle_device_readable();
                }
                Ok(PostAction::Continue)
            })
            .map_err(|e| InitError::Registration(e.error))?;
        self.bindings.borrow_mut().push_source("device-readiness", token);

        // Session activity and destruction.
        let weak = Rc::downgrade(self);
        let token = loop_handle
            .insert_source(self.session.session_events(), move |event, _, _| {
                if let channel::Event::Msg(event) = event {
                    if let Some(backend) = weak.upgrade() {
                        backend.handle_session_event(event);
                    }
                }
            })
            .map_err(|e| InitError::Registration(e.error))?;
        self.bindings.borrow_mut().push_source("session-events", token);

        // Secondary-GPU announcements; only the primary spawns children.
        if !has_parent {
            let weak = Rc::downgrade(self);
            let token = loop_handle
                .insert_source(self.session.gpu_events(), move |event, _, _| {
                    if let channel::Event::Msg(GpuEvent::Added { fd, path }) = event {
                        if let Some(backend) = weak.upgrade() {
                            backend.handle_gpu_added(fd, path);
                        }
                    }
                })
                .map_err(|e| InitError::Registration(e.error))?;
            self.bindings.borrow_mut().push_source("gpu-added", token);
        }

        let capabilities = self
            .scanner
            .check_features(device)
            .map_err(InitError::FeatureCheck)?;
        device.record_capabilities(capabilities);
        self.clock.set(capabilities.presentation_clock());
        debug!(device = %self.node_path.display(), ?capabilities, "Device features checked");

        self.scanner
            .init_resources(device)
            .map_err(InitError::Resources)?;
        self.resources_initialized.set(true);

        if !has_parent {
            let factory = renderer_factory.ok_or(InitError::NoRendererFactory)?;
            let renderer = factory.create_renderer(device)?;
            debug!(device = %self.node_path.display(), renderer = renderer.name(), "Renderer initialized");
            *self.renderer.borrow_mut() = Some(renderer);
        }

        // Registered last: a backend that failed construction must never
        // observe display teardown.
        let weak = Rc::downgrade(self);
        let handle = self.display.teardown_signal().listen(move |_| {
            if let Some(backend) = weak.upgrade() {
                debug!(device = %backend.node_path.display(), "Display teardown reached backend");
                backend.destroy();
            }
        });
        self.bindings.borrow_mut().set_teardown(handle);

        Ok(())
    }

    /// Unwinds a failed construction: exactly the registrations made so
    /// far, newest first, then resource tracking and the device handle.
    fn roll_back_creation(&self, device: DrmDeviceHandle) {
        self.phase.set(LifecyclePhase::Destroying);
        self.bindings.borrow_mut().unregister_all(&self.display);
        if self.resources_initialized.replace(false) {
            self.scanner.finish_resources(&device);
        }
        self.renderer.borrow_mut().take();
        device.close(&*self.session);
        self.phase.set(LifecyclePhase::Destroyed);
    }

    /// Starts the backend: the initial connector rescan.
    ///
    /// Infallible once running: the feature check already happened at
    /// creation, and a failing initial scan is logged and retried on the
    /// next invalidation.
    pub fn start(&self) -> bool {
        if self.phase.get() != LifecyclePhase::Running {
            warn!(device = %self.node_path.display(), "start() on a backend that is not running");
            return false;
        }
        info!(device = %self.node_path.display(), "Starting DRM backend");
        if let Err(e) = self.rescan() {
            warn!(device = %self.node_path.display(), error = %e, "Initial connector scan failed");
        }
        true
    }

    /// Tears the backend down. Idempotent across all trigger paths.
    pub fn destroy(&self) {
        match self.phase.get() {
            LifecyclePhase::Running => {}
            phase => {
                trace!(device = %self.node_path.display(), ?phase, "destroy() ignored");
                return;
            }
        }
        self.phase.set(LifecyclePhase::Destroying);
        info!(device = %self.node_path.display(), "Destroying DRM backend");

        // Leave the hardware as we found it, then drop the records.
        if let Some(device) = self.device.borrow().as_ref() {
            self.connectors.borrow().restore_all(&*self.scanner, device);
        }
        let removed = self.connectors.borrow_mut().drain();
        for event in &removed {
            self.events.connector_removed.emit(event);
        }

        // Subscribers may still read backend state during this emission;
        // internal resources are released only afterwards.
        self.events.destroyed.emit(&());

        self.bindings.borrow_mut().unregister_all(&self.display);
        debug_assert!(self.bindings.borrow().is_empty());
        if self.resources_initialized.replace(false) {
            if let Some(device) = self.device.borrow().as_ref() {
                self.scanner.finish_resources(device);
            }
        }
        self.renderer.borrow_mut().take();
        if let Some(device) = self.device.borrow_mut().take() {
            device.close(&*self.session);
        }

        self.phase.set(LifecyclePhase::Destroyed);
        debug!(device = %self.node_path.display(), "DRM backend destroyed");
    }

    /// The renderer to draw with: the parent's when this is a child
    /// backend, this backend's own otherwise.
    pub fn renderer(&self) -> Option<Rc<dyn Renderer>> {
        match &self.parent {
            Some(parent) => match parent.upgrade() {
                Some(parent) => parent.renderer(),
                None => {
                    error!(device = %self.node_path.display(), "Parent backend gone before its child; renderer unavailable");
                    None
                }
            },
            None => self.renderer.borrow().clone(),
        }
    }

    /// The presentation clock recorded at creation.
    pub fn presentation_clock(&self) -> ClockId {
        self.clock.get()
    }

    /// Registers the aggregator newly announced GPUs are reported to.
    ///
    /// Held weakly: the aggregator owns the backends, not the other way
    /// around.
    pub fn set_aggregator(&self, aggregator: &Rc<dyn MultiGpuAggregator>) {
        *self.aggregator.borrow_mut() = Some(Rc::downgrade(aggregator));
    }

    /// Applies or clears a mode on one tracked connector.
    ///
    /// Commit failures leave the connector disabled; the backend keeps
    /// running either way.
    pub fn set_connector_mode(
        &self,
        id: ConnectorId,
        mode: Option<Mode>,
    ) -> Result<(), CommitError> {
        if self.phase.get() != LifecyclePhase::Running {
            trace!(device = %self.node_path.display(), "set_connector_mode on a backend that is not running");
            return Ok(());
        }
        let device_guard = self.device.borrow();
        let Some(device) = device_guard.as_ref() else {
            return Ok(());
        };
        self.connectors
            .borrow_mut()
            .set_mode(&*self.scanner, device, id, mode)
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase.get()
    }

    pub fn is_primary(&self) -> bool {
        self.parent.is_none()
    }

    /// Notifications this backend emits.
    pub fn events(&self) -> &BackendEvents {
        &self.events
    }

    /// Read-only view of the tracked connectors.
    pub fn connectors(&self) -> Vec<ConnectorSnapshot> {
        self.connectors.borrow().snapshots()
    }

    /// Rescans connectors and delivers the resulting add/remove
    /// notifications (outside the set's borrow, so listeners may inspect
    /// the backend).
    fn rescan(&self) -> Result<RescanOutcome, ScanError> {
        let outcome = {
            let device_guard = self.device.borrow();
            let Some(device) = device_guard.as_ref() else {
                return Ok(RescanOutcome::default());
            };
            self.connectors.borrow_mut().rescan(&*self.scanner, device)?
        };
        for event in &outcome.added {
            self.events.connector_added.emit(event);
        }
        for event in &outcome.removed {
            self.events.connector_removed.emit(event);
        }
        Ok(outcome)
    }

    /// The kernel invalidated the device node: rescan, and tear down a
    /// backend whose every connector is gone. A zero-output backend is
    /// assumed abandoned and its driver resources are freed proactively.
    fn handle_device_invalidated(self: &Rc<Self>) {
        if self.phase.get() != LifecyclePhase::Running {
            trace!("Device invalidation after teardown, ignoring");
            return;
        }
        let before = self.connectors.borrow().len();
        debug!(device = %self.node_path.display(), connectors = before, "Device invalidated, rescanning");

        let outcome = match self.rescan() {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(device = %self.node_path.display(), error = %e, "Invalidation rescan failed");
                return;
            }
        };
        debug!(
            device = %self.node_path.display(),
            connectors = self.connectors.borrow().len(),
            all_disconnected = outcome.all_disconnected,
            "Invalidation rescan finished"
        );

        if outcome.all_disconnected && self.config.teardown_when_all_disconnected {
            info!(device = %self.node_path.display(), "All connectors disconnected, tearing down backend");
            self.destroy();
        }
    }

    /// Readiness on the device descriptor: let the scanner drain whatever
    /// the kernel queued.
    fn handle_device_readable(self: &Rc<Self>) {
        if self.phase.get() != LifecyclePhase::Running {
            return;
        }
        if let Some(device) = self.device.borrow().as_ref() {
            if let Err(e) = self.scanner.process_events(device) {
                warn!(device = %self.node_path.display(), error = %e, "Dispatching device events failed");
            }
        }
    }

    fn handle_session_event(self: &Rc<Self>, event: SessionEvent) {
        if self.phase.get() != LifecyclePhase::Running {
            trace!(?event, "Session event after teardown, ignoring");
            return;
        }
        match event {
            SessionEvent::Activated => {
                info!(device = %self.node_path.display(), "Session resumed, resynchronizing outputs");
                self.resync_outputs();
            }
            SessionEvent::Paused => {
                // No device access while paused; intent is re-applied on
                // the next activation.
                info!(device = %self.node_path.display(), "Session paused");
            }
            SessionEvent::Destroyed => {
                info!(device = %self.node_path.display(), "Session destroyed, tearing down backend");
                self.destroy();
            }
        }
    }

    /// After regaining device access, force hardware state back to the
    /// recorded intent: re-apply the desired mode of every enabled
    /// connector, explicitly disable every other one.
    fn resync_outputs(&self) {
        if let Err(e) = self.rescan() {
            warn!(device = %self.node_path.display(), error = %e, "Resume rescan failed");
        }
        let plan: Vec<(ConnectorId, Option<Mode>)> = self
            .connectors
            .borrow()
            .snapshots()
            .into_iter()
            .map(|c| match (c.enabled, c.desired_mode) {
                (true, Some(mode)) => (c.id, Some(mode)),
                _ => (c.id, None),
            })
            .collect();
        for (id, mode) in plan {
            let _ = self.set_connector_mode(id, mode);
        }
    }

    /// The session announced an additional GPU: spawn a child backend and
    /// hand it to the aggregator. A failing secondary never affects the
    /// primary.
    fn handle_gpu_added(self: &Rc<Self>, fd: DeviceFd, path: PathBuf) {
        if self.phase.get() != LifecyclePhase::Running {
            return;
        }
        info!(parent = %self.node_path.display(), device = %path.display(), "Secondary GPU announced");

        let child = match DrmBackend::create(
            &self.display,
            Rc::clone(&self.session),
            Rc::clone(&self.scanner),
            fd,
            path.clone(),
            Some(self),
            None,
            self.config.clone(),
        ) {
            Ok(child) => child,
            Err(e) => {
                warn!(device = %path.display(), error = %MultiGpuError::Create(e), "Dropping secondary GPU");
                return;
            }
        };

        let aggregator = self.aggregator.borrow().as_ref().and_then(Weak::upgrade);
        match aggregator {
            Some(aggregator) => {
                if aggregator.add_backend(child.clone() as Rc<dyn CompositorBackend>) {
                    info!(device = %path.display(), "Secondary GPU backend registered");
                } else {
                    warn!(device = %path.display(), error = %MultiGpuError::Register, "Destroying unregistered secondary backend");
                    child.destroy();
                }
            }
            None => {
                warn!(device = %path.display(), error = %MultiGpuError::NoAggregator, "Destroying unreachable secondary backend");
                child.destroy();
            }
        }
    }
}

impl CompositorBackend for DrmBackend {
    fn start(&self) -> bool {
        DrmBackend::start(self)
    }

    fn destroy(&self) {
        DrmBackend::destroy(self);
    }

    fn renderer(&self) -> Option<Rc<dyn Renderer>> {
        DrmBackend::renderer(self)
    }

    fn presentation_clock(&self) -> ClockId {
        DrmBackend::presentation_clock(self)
    }
}

impl std::fmt::Debug for DrmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmBackend")
            .field("device", &self.node_path)
            .field("phase", &self.phase.get())
            .field("primary", &self.is_primary())
            .field("connectors", &self.connectors.borrow().len())
            .finish()
    }
}
