//! Compositor-side system components.

pub mod backend;
pub mod display_loop;
pub mod errors;
pub mod signals;
