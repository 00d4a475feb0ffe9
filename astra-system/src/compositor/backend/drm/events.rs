//! Backend notifications and the listener-registration registry.

use calloop::RegistrationToken;
use tracing::trace;

use crate::compositor::backend::drm::connectors::ConnectorId;
use crate::compositor::display_loop::DisplayHandle;
use crate::compositor::signals::{ListenerHandle, Signal};

/// Identifies a connector in add/remove notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorEvent {
    pub id: ConnectorId,
    pub name: String,
}

/// Notifications a backend exposes to external subscribers.
#[derive(Debug, Default)]
pub struct BackendEvents {
    /// Emitted exactly once, during teardown, before internal resources
    /// are released; subscribers may still read backend state.
    pub destroyed: Signal<()>,
    /// A connector record was created.
    pub connector_added: Signal<ConnectorEvent>,
    /// A connector record was removed (confirmed gone, or backend
    /// teardown).
    pub connector_removed: Signal<ConnectorEvent>,
}

/// The registrations a backend holds on the display loop and the teardown
/// signal.
///
/// Exactly the set of subscriptions made at construction. Unregistration
/// runs in reverse registration order and each handle is released at most
/// once: construction rollback unwinds the subset registered so far,
/// teardown unwinds all of them.
#[derive(Debug, Default)]
pub(crate) struct EventBindings {
    sources: Vec<(&'static str, RegistrationToken)>,
    teardown: Option<ListenerHandle>,
}

impl EventBindings {
    pub(crate) fn push_source(&mut self, name: &'static str, token: RegistrationToken) {
        trace!(binding = name, "Registered event source");
        self.sources.push((name, token));
    }

    pub(crate) fn set_teardown(&mut self, handle: ListenerHandle) {
        debug_assert!(self.teardown.is_none(), "teardown listener registered twice");
        self.teardown = Some(handle);
    }

    /// Releases every held registration, newest first.
    pub(crate) fn unregister_all(&mut self, display: &DisplayHandle) {
        if let Some(handle) = self.teardown.take() {
            trace!("Unregistered teardown listener");
            display.teardown_signal().remove(handle);
        }
        while let Some((name, token)) = self.sources.pop() {
            trace!(binding = name, "Unregistered event source");
            display.loop_handle().remove(token);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.teardown.is_none()
    }
}
