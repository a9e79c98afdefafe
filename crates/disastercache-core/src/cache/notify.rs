//! Change notification for cache consumers.
//!
//! Listeners take no arguments: a call means "something changed", and the
//! listener re-reads whatever it needs through the cache getters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

pub type Listener = Arc<dyn Fn() + Send + Sync>;

type Registry = Mutex<Vec<(u64, Listener)>>;

#[derive(Clone, Default)]
pub struct Listeners {
    registry: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The returned `Subscription` removes it again.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe_shared(Arc::new(listener))
    }

    /// Register a shared listener. Registering the same `Arc` twice keeps a
    /// single entry.
    pub fn subscribe_shared(&self, listener: Listener) -> Subscription {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = registry
            .iter()
            .find(|(_, l)| same_listener(l, &listener))
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                registry.push((id, listener));
                id
            }
        };
        debug!(total = registry.len(), "Listener subscribed");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Call every registered listener.
    ///
    /// The registry lock is released before any listener runs, so listeners
    /// may subscribe, unsubscribe, or read cache state.
    pub fn notify(&self) {
        let snapshot: Vec<Listener> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        debug!(count = snapshot.len(), "Notifying listeners");
        for listener in snapshot {
            listener();
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Compare by the address of the closure, ignoring vtable metadata.
fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Handle returned by `subscribe`. Dropping it leaves the listener registered;
/// call `unsubscribe` to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.retain(|(id, _)| *id != self.id);
            debug!(remaining = registry.len(), "Listener unsubscribed");
        }
    }
}
