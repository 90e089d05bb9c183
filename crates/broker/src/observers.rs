//! Synchronous observer sets
//!
//! Listeners are called synchronously, in registration order, on the thread
//! that calls [`Observers::notify`]. Registration returns a [`ListenerHandle`];
//! dropping the handle does not detach the listener, `unsubscribe` does.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

struct Slots<T> {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener<T>>>,
}

impl<T> Detach for Slots<T> {
    fn detach(&self, id: u64) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }
}

/// Set of listeners for events of type `T`
pub struct Observers<T> {
    slots: Arc<Slots<T>>,
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Slots {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a listener
    pub fn register<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.slots.next_id.fetch_add(1, Ordering::SeqCst);
        self.slots.listeners.lock().insert(id, Arc::new(listener));
        let slots: Weak<dyn Detach> = Arc::downgrade(&self.slots) as Weak<dyn Detach>;
        ListenerHandle { id, slots }
    }

    /// Call every listener with `event`.
    ///
    /// The listener list is copied first, so listeners may unsubscribe
    /// themselves (or others) while being notified.
    pub fn notify(&self, event: &T) {
        let listeners: Vec<Listener<T>> = self.slots.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.listeners.lock().is_empty()
    }

    pub fn clear(&self) {
        self.slots.listeners.lock().clear();
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Detaches a registered listener
pub struct ListenerHandle {
    id: u64,
    slots: Weak<dyn Detach>,
}

impl ListenerHandle {
    /// Detach the listener. Returns `false` if it was already detached or
    /// the observer set is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.slots.upgrade() {
            Some(slots) => slots.detach(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
