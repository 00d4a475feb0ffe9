//! Error types of the compositor system layer, defined with `thiserror`.

use astra_core::CoreError;
use thiserror::Error;

use crate::compositor::backend::drm::errors::BackendError;

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Event loop error: {0}")]
    EventLoop(#[from] calloop::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Internal compositor error: {0}")]
    Internal(String),
}
