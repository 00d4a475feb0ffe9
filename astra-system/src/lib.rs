//! # Astra System Library (`astra-system`)
//!
//! The system layer of the Astra display server. Its centerpiece is the
//! DRM backend lifecycle core under [`compositor::backend::drm`]: the
//! component that owns one GPU device, tracks its display connectors,
//! reacts to session and device-invalidation events, and composes
//! primary and secondary GPUs into one logical backend for the
//! compositor.
//!
//! External collaborators (the privileged session, the connector-scanning
//! and mode-setting machinery, the renderer, and the multi-backend
//! aggregator) are consumed through traits; this crate implements the
//! orchestration on top of them.

pub mod compositor;
