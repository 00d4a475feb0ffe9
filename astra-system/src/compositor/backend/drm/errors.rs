//! Error taxonomy of the DRM backend lifecycle.
//!
//! Construction failures are surfaced to the caller as [`BackendError`];
//! steady-state failures (rescans, mode commits, secondary-GPU handling)
//! are absorbed and logged where they occur, never propagated as a crash.

use thiserror::Error;

use crate::compositor::backend::drm::renderer::RendererInitError;
use crate::compositor::backend::drm::scanner::ScanError;
use crate::compositor::backend::drm::session::SessionError;

/// A backend could not be constructed.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The device descriptor could not be acquired from the session.
    #[error("failed to open DRM device: {0}")]
    Open(#[from] SessionError),

    /// A construction step after the device open failed. Every
    /// registration made before the failing step has been rolled back and
    /// the device handle released.
    #[error("DRM backend initialization failed: {0}")]
    Init(#[from] InitError),
}

/// The construction step that failed.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("event source registration failed: {0}")]
    Registration(#[source] calloop::Error),

    #[error("device feature check failed: {0}")]
    FeatureCheck(#[source] ScanError),

    #[error("kernel resource tracking failed: {0}")]
    Resources(#[source] ScanError),

    #[error(transparent)]
    Renderer(#[from] RendererInitError),

    /// A primary backend was created without a renderer factory.
    #[error("no renderer factory provided for a primary backend")]
    NoRendererFactory,
}
