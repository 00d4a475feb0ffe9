//! Interface to the multi-backend aggregator collaborator.

use std::rc::Rc;

use thiserror::Error;

use crate::compositor::backend::CompositorBackend;
use crate::compositor::backend::drm::errors::BackendError;

/// The external aggregator composing multiple backends into one logical
/// backend for the compositor.
///
/// Membership is a reference, not ownership handed over: the aggregator is
/// told about a backend's existence and keeps its own bookkeeping (it is
/// expected to subscribe to the backend's destroyed notification and drop
/// its strong reference there). Its lifetime is independent of any
/// backend's.
pub trait MultiGpuAggregator {
    /// Registers a backend. Returns `false` if the aggregator refuses it.
    fn add_backend(&self, backend: Rc<dyn CompositorBackend>) -> bool;
}

/// Why a secondary GPU never became an output source. Logged and dropped;
/// the primary backend is unaffected.
#[derive(Debug, Error)]
pub enum MultiGpuError {
    #[error("secondary GPU backend creation failed: {0}")]
    Create(#[from] BackendError),

    #[error("aggregator rejected the secondary GPU backend")]
    Register,

    #[error("no aggregator registered with the primary backend")]
    NoAggregator,
}
