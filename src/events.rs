//! Observer-registration event primitive.
//!
//! The C# original exposes multicast-delegate events (`Connected`,
//! `Disconnected`, `MessageReceived`, ...). Rust has no direct analogue, so
//! each event is modeled as an [`EventEmitter<T>`]: a list of listeners
//! behind a lock. Handlers may be registered before or after the owning
//! object starts, and a handler is free to unregister itself (or another
//! listener) from within its own callback — `emit` clones the listener list
//! out from under the lock before invoking anything, so mutation during
//! dispatch never deadlocks and never affects the in-flight dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`EventEmitter::subscribe`], used to later remove the
/// listener with [`EventEmitter::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A single named event with any number of registered listeners.
///
/// `T` is typically a cheaply cloneable payload (an `Arc<...>` or a small
/// value type); `emit` clones it once per listener.
pub struct EventEmitter<T: Clone> {
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T: Clone> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new listener. Returns an id that can be passed to
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered listener. A no-op if the id is not
    /// (or is no longer) present.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }

    /// Invoke every currently registered listener with a clone of `value`,
    /// on the calling thread, in registration order.
    ///
    /// The listener snapshot is taken under the lock and then the lock is
    /// released, so a handler that calls `subscribe`/`unsubscribe` on this
    /// same emitter does not deadlock; it simply does not affect the
    /// dispatch already in progress.
    pub fn emit(&self, value: T) {
        let snapshot: Vec<Listener<T>> = {
            let guard = self.listeners.lock().unwrap();
            guard.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for handler in snapshot {
            handler(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
