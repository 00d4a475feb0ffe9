//! Compositor backends and the capability interface they expose.

use std::rc::Rc;

use crate::compositor::backend::drm::device::ClockId;
use crate::compositor::backend::drm::renderer::Renderer;

pub mod drm;

/// Capabilities a backend exposes to the multi-backend aggregator.
///
/// This is the only surface the aggregator and the renderer consumer
/// touch; everything else about a backend is internal. Implementations are
/// heterogeneous (primary DRM backends, render-only children), and the
/// aggregator treats them uniformly through this trait.
pub trait CompositorBackend {
    /// Starts the backend.
    ///
    /// For a DRM backend this performs the initial connector rescan. Always
    /// succeeds on a running backend; returns `false` if the backend was
    /// already torn down.
    fn start(&self) -> bool;

    /// Destroys the backend, releasing every resource it holds.
    ///
    /// Idempotent: the explicit caller, the session-destroy notification,
    /// and the display-teardown notification may all invoke this, in any
    /// combination, and teardown happens at most once.
    fn destroy(&self);

    /// The renderer this backend draws with.
    ///
    /// A backend created with a parent always answers with the parent's
    /// renderer, never a private one. `None` once the backend is destroyed.
    fn renderer(&self) -> Option<Rc<dyn Renderer>>;

    /// The presentation clock recorded when the backend was created.
    fn presentation_clock(&self) -> ClockId;
}
