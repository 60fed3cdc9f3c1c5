use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

type Listener = Arc<dyn Fn() + Send + Sync>;
type ListenerMap = Mutex<HashMap<u64, Listener>>;

/// Observable single-value holder: the source of truth for state that is
/// mirrored across the process boundary.
///
/// `set` replaces the held snapshot atomically and then synchronously invokes
/// every registered listener exactly once, with no arguments; listeners read
/// the current value through [`StateContainer::get`]. The notify path never
/// suspends. Listeners observe either the entirely-old or entirely-new
/// snapshot, never a mix, because the replacement is a whole new value.
pub struct StateContainer<T> {
    value: RwLock<Arc<T>>,
    listeners: Arc<ListenerMap>,
    next_listener_id: AtomicU64,
}

impl<T> StateContainer<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: RwLock::new(Arc::new(initial)),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Current snapshot. Cheap to call; the returned `Arc` stays valid even
    /// if the container moves on to a newer snapshot.
    pub fn get(&self) -> Arc<T> {
        self.value.read().clone()
    }

    /// Replace the snapshot and notify all listeners.
    pub fn set(&self, value: T) {
        *self.value.write() = Arc::new(value);
        self.notify();
    }

    /// Register a change listener. The returned [`Subscription`] unregisters
    /// on drop; call [`Subscription::detach`] to keep the listener for the
    /// container's lifetime.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
            detached: false,
        }
    }

    fn notify(&self) {
        // Snapshot the listener list first so a listener may subscribe or
        // unsubscribe without deadlocking the map lock.
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}

impl<T: Clone> StateContainer<T> {
    /// Clone the current snapshot, apply `mutate`, and publish the result as
    /// the new snapshot. The read-modify-write is atomic with respect to
    /// other `update`/`set` calls; notification happens after the write lock
    /// is released.
    pub fn update(&self, mutate: impl FnOnce(&mut T)) {
        {
            let mut guard = self.value.write();
            let mut next = (**guard).clone();
            mutate(&mut next);
            *guard = Arc::new(next);
        }
        self.notify();
    }
}

/// Handle for a registered listener. Dropping it unregisters the listener;
/// unregistering an already-gone container is a no-op.
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerMap>,
    detached: bool,
}

impl Subscription {
    /// Explicitly unregister the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener registered for the container's lifetime.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_set_notifies_each_listener_once() {
        let container = StateContainer::new(0u32);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_a = calls.clone();
        let _sub_a = container.subscribe(move || {
            calls_a.fetch_add(1, Ordering::SeqCst);
        });
        let calls_b = calls.clone();
        let _sub_b = container.subscribe(move || {
            calls_b.fetch_add(1, Ordering::SeqCst);
        });

        container.set(1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        container.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_listener_reads_new_snapshot() {
        let container = Arc::new(StateContainer::new(String::from("old")));
        let observed = Arc::new(Mutex::new(String::new()));

        let reader = container.clone();
        let observed_in_listener = observed.clone();
        container
            .subscribe(move || {
                *observed_in_listener.lock() = (*reader.get()).clone();
            })
            .detach();

        container.set("new".to_string());
        assert_eq!(*observed.lock(), "new");
    }

    #[test]
    fn test_dropped_subscription_stops_notifications() {
        let container = StateContainer::new(0u32);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let sub = container.subscribe(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        container.set(1);
        sub.unsubscribe();
        container.set(2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_applies_mutation_to_clone() {
        let container = StateContainer::new(vec![1, 2]);
        let before = container.get();

        container.update(|v| v.push(3));

        assert_eq!(*before, vec![1, 2]);
        assert_eq!(*container.get(), vec![1, 2, 3]);
    }
}
