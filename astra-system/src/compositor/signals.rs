//! Synchronous notification signals with explicit listener handles.
//!
//! [`Signal`] is the seam between the backend and its observers: listeners
//! are registered with [`Signal::listen`], which returns a
//! [`ListenerHandle`] that must be used to unregister. Emission is
//! synchronous and runs on the caller's stack; the listener list is
//! snapshotted before dispatch, so a listener may remove itself (or any
//! other listener) while the signal is being emitted.

use std::cell::RefCell;
use std::rc::Rc;

/// Handle identifying one registered listener on a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

type Listener<T> = Rc<dyn Fn(&T)>;

struct SignalInner<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// A synchronous, single-threaded notification signal.
pub struct Signal<T> {
    inner: RefCell<SignalInner<T>>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Signal {
            inner: RefCell::new(SignalInner {
                next_id: 0,
                listeners: Vec::new(),
            }),
        }
    }

    /// Registers a listener, returning the handle needed to remove it.
    pub fn listen(&self, listener: impl Fn(&T) + 'static) -> ListenerHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Rc::new(listener)));
        ListenerHandle(id)
    }

    /// Removes a previously registered listener.
    ///
    /// Returns `false` if the handle was already removed.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _)| *id != handle.0);
        inner.listeners.len() != before
    }

    /// Invokes every registered listener with `event`.
    ///
    /// The listener list is cloned before dispatch so that listeners may
    /// register or remove listeners reentrantly.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = self
            .inner
            .borrow()
            .listeners
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Signal::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn listeners_receive_emitted_events() {
        let signal = Signal::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        signal.listen(move |v: &u32| c.set(c.get() + *v));

        signal.emit(&2);
        signal.emit(&3);
        assert_eq!(count.get(), 5);
    }

    #[test]
    fn removed_listeners_are_not_invoked() {
        let signal = Signal::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let handle = signal.listen(move |_: &()| c.set(c.get() + 1));

        signal.emit(&());
        assert!(signal.remove(handle));
        assert!(!signal.remove(handle));
        signal.emit(&());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn listener_may_remove_itself_during_emit() {
        let signal = Rc::new(Signal::new());
        let handle = Rc::new(Cell::new(None));
        let count = Rc::new(Cell::new(0));

        let sig = signal.clone();
        let h = handle.clone();
        let c = count.clone();
        handle.set(Some(signal.listen(move |_: &()| {
            c.set(c.get() + 1);
            if let Some(handle) = h.get() {
                sig.remove(handle);
            }
        })));

        signal.emit(&());
        signal.emit(&());
        assert_eq!(count.get(), 1);
        assert_eq!(signal.listener_count(), 0);
    }
}
