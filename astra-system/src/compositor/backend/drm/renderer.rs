//! Interface to the rendering collaborator.

use std::rc::Rc;

use thiserror::Error;

use crate::compositor::backend::drm::device::DrmDeviceHandle;

/// An initialized rendering context, opaque to the backend core.
///
/// A primary backend owns exactly one; a child backend borrows its
/// parent's and never creates a private one.
pub trait Renderer {
    /// Diagnostic name of the renderer implementation.
    fn name(&self) -> &str;
}

/// The renderer could not be initialized on the device. Treated like any
/// other construction failure: the backend is rolled back.
#[derive(Debug, Error)]
#[error("renderer initialization failed: {0}")]
pub struct RendererInitError(pub String);

/// Creates rendering contexts for primary backends.
pub trait RendererFactory {
    fn create_renderer(&self, device: &DrmDeviceHandle)
        -> Result<Rc<dyn Renderer>, RendererInitError>;
}
