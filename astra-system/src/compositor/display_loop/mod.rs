//! The display server's cooperative event loop.
//!
//! All backend callbacks run as synchronous dispatches of this single
//! Calloop event loop; nothing in the backend core runs on its own thread.
//! [`DisplayLoop`] owns the loop and the teardown notification; backends
//! receive a [`DisplayHandle`] to register event sources and the teardown
//! listener, and keep the returned registration handles so teardown can
//! unregister them individually.

use std::rc::Rc;
use std::time::Duration;

use astra_core::config::CoreConfig;
use astra_core::logging;
use calloop::{EventLoop, LoopHandle};
use tracing::info;

use crate::compositor::errors::CompositorError;
use crate::compositor::signals::Signal;

/// Mutable state threaded through event-loop dispatches.
#[derive(Debug)]
pub struct DisplayState {
    /// Cleared by the surrounding server to leave its dispatch loop.
    pub running: bool,
}

impl Default for DisplayState {
    fn default() -> Self {
        DisplayState { running: true }
    }
}

/// Handle through which backends attach to the display server.
///
/// Bundles the Calloop loop handle (for readiness and channel sources) with
/// the display teardown signal (emitted once, synchronously, right before
/// the server shuts the loop down).
#[derive(Debug, Clone)]
pub struct DisplayHandle {
    loop_handle: LoopHandle<'static, DisplayState>,
    teardown: Rc<Signal<()>>,
}

impl DisplayHandle {
    pub fn loop_handle(&self) -> &LoopHandle<'static, DisplayState> {
        &self.loop_handle
    }

    pub fn teardown_signal(&self) -> &Rc<Signal<()>> {
        &self.teardown
    }
}

/// The main compositor event loop.
pub struct DisplayLoop {
    event_loop: EventLoop<'static, DisplayState>,
    teardown: Rc<Signal<()>>,
}

impl DisplayLoop {
    pub fn new() -> Result<Self, CompositorError> {
        let event_loop = EventLoop::try_new()?;
        Ok(DisplayLoop {
            event_loop,
            teardown: Rc::new(Signal::new()),
        })
    }

    /// Initializes logging from the core configuration, then creates the
    /// event loop.
    ///
    /// Logging initialization failures (typically a subscriber installed by
    /// an embedding process) are reported to `stderr` and otherwise
    /// ignored.
    pub fn initialize(config: &CoreConfig) -> Result<Self, CompositorError> {
        if let Err(e) = logging::initialize_logging(&config.logging) {
            eprintln!("Failed to initialize logging (possibly already initialized): {e}");
        }
        info!("Starting Astra display loop");
        Self::new()
    }

    pub fn handle(&self) -> DisplayHandle {
        DisplayHandle {
            loop_handle: self.event_loop.handle(),
            teardown: self.teardown.clone(),
        }
    }

    /// Dispatches pending events, blocking at most `timeout`.
    pub fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        state: &mut DisplayState,
    ) -> Result<(), CompositorError> {
        self.event_loop.dispatch(timeout, state)?;
        Ok(())
    }

    /// Emits the teardown notification.
    ///
    /// The surrounding server calls this exactly once, before dropping the
    /// loop; every registered backend destroys itself synchronously during
    /// the emission.
    pub fn signal_teardown(&self) {
        info!("Display teardown signalled");
        self.teardown.emit(&());
    }
}

impl std::fmt::Debug for DisplayLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayLoop")
            .field("teardown", &self.teardown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn dispatch_runs_inserted_sources() {
        let mut display = DisplayLoop::new().unwrap();
        let handle = display.handle();

        let (sender, channel) = calloop::channel::channel();
        let seen = Rc::new(Cell::new(0u32));
        let s = seen.clone();
        handle
            .loop_handle()
            .insert_source(channel, move |event, _, _| {
                if let calloop::channel::Event::Msg(v) = event {
                    s.set(s.get() + v);
                }
            })
            .unwrap();

        sender.send(4).unwrap();
        let mut state = DisplayState::default();
        display
            .dispatch(Some(Duration::from_millis(10)), &mut state)
            .unwrap();
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn teardown_reaches_listeners_once() {
        let display = DisplayLoop::new().unwrap();
        let handle = display.handle();
        let count = Rc::new(Cell::new(0u32));
        let c = count.clone();
        handle.teardown_signal().listen(move |_| c.set(c.get() + 1));

        display.signal_teardown();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn initialize_builds_a_loop_from_default_config() {
        let config = CoreConfig::default();
        let display = DisplayLoop::initialize(&config).unwrap();
        drop(display);
    }
}
