//! Callback registries for events and connection status.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Ordered set of listeners for values of type `T`.
///
/// Emission iterates over a snapshot of the registered callbacks, so a
/// listener added or removed mid-emission only affects later emissions. A
/// panicking listener is logged and does not stop the others.
pub(crate) struct ListenerSet<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub(crate) fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerHandle {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(callback)));
            id
        };
        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        ListenerHandle {
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    pub(crate) fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .registry
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!("listener panicked; continuing with remaining listeners");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }
}

/// Registration token returned by the `on_*` methods.
///
/// Dropping the handle leaves the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    /// Remove the listener. Idempotent with respect to an already-dropped
    /// client.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_in_registration_order() {
        let set = ListenerSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            let _handle = set.add(move |v| seen.lock().push(format!("{tag}{v}")));
        }
        set.emit(&1);
        assert_eq!(*seen.lock(), vec!["a1".to_string(), "b1".to_string()]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let set = ListenerSet::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = set.add(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        set.emit(&1);
        handle.unsubscribe();
        set.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn dropped_handle_keeps_listener() {
        let set = ListenerSet::<u32>::new();
        drop(set.add(|_| {}));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let set = ListenerSet::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _bad = set.add(|_| panic!("listener failure"));
        let c = Arc::clone(&count);
        let _good = set.add(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        set.emit(&7);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removal_during_emit_affects_next_emit_only() {
        let set = Arc::new(ListenerSet::<u32>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let s = Arc::clone(&slot);
        let _remover = set.add(move |_| {
            if let Some(handle) = s.lock().take() {
                handle.unsubscribe();
            }
        });
        let c = Arc::clone(&count);
        *slot.lock() = Some(set.add(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        }));

        set.emit(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        set.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_set_dropped_is_noop() {
        let set = ListenerSet::<u32>::new();
        let handle = set.add(|_| {});
        drop(set);
        handle.unsubscribe();
    }
}
