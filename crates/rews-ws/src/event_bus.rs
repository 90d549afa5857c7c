//! Publish/subscribe event bus.
//!
//! Listeners are registered per event name and invoked in registration order.
//! `emit` works on a snapshot of the listener list, so a listener may add or
//! remove listeners (including itself) while it runs. A panicking listener is
//! logged and does not stop the remaining listeners.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Listener callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by `add_listener`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event bus keyed by event name `K`, carrying events of type `E`.
pub struct EventBus<K, E> {
    listeners: RwLock<HashMap<K, Vec<(ListenerId, Listener<E>)>>>,
    next_id: AtomicU64,
}

impl<K, E> Default for EventBus<K, E>
where
    K: Eq + Hash + Copy + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> EventBus<K, E>
where
    K: Eq + Hash + Copy + Debug,
{
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `callback` to `name`.
    pub fn add_listener<F>(&self, name: K, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(name)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener. Returns whether it was registered under `name`.
    pub fn remove_listener(&self, name: K, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(&name) else {
            return false;
        };
        let Some(pos) = list.iter().position(|(lid, _)| *lid == id) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            listeners.remove(&name);
        }
        true
    }

    /// Invoke every listener registered for `name`.
    ///
    /// Returns whether any listener existed.
    pub fn emit(&self, name: K, event: &E) -> bool {
        let snapshot: Vec<Listener<E>> = match self.listeners.read().get(&name) {
            Some(list) if !list.is_empty() => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            _ => return false,
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(event = ?name, "Event listener panicked");
            }
        }
        true
    }

    /// Number of listeners registered for `name`.
    pub fn listener_count(&self, name: K) -> usize {
        self.listeners.read().get(&name).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_reaches_listeners_in_order() {
        let bus: EventBus<&'static str, u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.add_listener("tick", move |v| s.lock().push(("first", *v)));
        let s = seen.clone();
        bus.add_listener("tick", move |v| s.lock().push(("second", *v)));

        assert!(bus.emit("tick", &7));
        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_emit_without_listeners() {
        let bus: EventBus<&'static str, u32> = EventBus::new();
        assert!(!bus.emit("tick", &1));
    }

    #[test]
    fn test_remove_listener() {
        let bus: EventBus<&'static str, u32> = EventBus::new();
        let id = bus.add_listener("tick", |_| {});

        assert!(!bus.remove_listener("tock", id));
        assert!(bus.remove_listener("tick", id));
        assert!(!bus.remove_listener("tick", id));
        assert_eq!(bus.listener_count("tick"), 0);
        assert!(!bus.emit("tick", &1));
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus: EventBus<&'static str, u32> = EventBus::new();
        let calls = Arc::new(AtomicU64::new(0));

        bus.add_listener("tick", |_| panic!("listener failure"));
        let c = calls.clone();
        bus.add_listener("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.emit("tick", &1));
        assert!(bus.emit("tick", &2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_can_remove_itself_during_emit() {
        let bus: Arc<EventBus<&'static str, u32>> = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicU64::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let (b, c, slot) = (bus.clone(), calls.clone(), own_id.clone());
        let id = bus.add_listener("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot.lock() {
                b.remove_listener("tick", id);
            }
        });
        *own_id.lock() = Some(id);

        bus.emit("tick", &1);
        bus.emit("tick", &2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
