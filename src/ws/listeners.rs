//! Typed publish/subscribe primitive.
//!
//! Every channel in the registry and the client lifecycle event bus are a
//! [`ListenerSet`] over a statically known payload type.

use std::{
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use tracing::error;

use crate::infra::logging::targets;

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    pub(crate) fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A set of handlers for one payload type.
///
/// Handlers are invoked in registration order. A panicking handler is
/// logged and does not prevent delivery to the remaining handlers.
pub struct ListenerSet<T> {
    handlers: RwLock<BTreeMap<ListenerId, Handler<T>>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> std::fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> ListenerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on_handler(Arc::new(handler))
    }

    pub(crate) fn on_handler(&self, handler: Handler<T>) -> ListenerId {
        let id = ListenerId::next();
        self.write().insert(id, handler);
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Invoke every handler registered at the time of the call.
    ///
    /// Returns the number of handlers that panicked.
    pub fn emit(&self, payload: &T) -> usize {
        let snapshot: Vec<(ListenerId, Handler<T>)> = self
            .read()
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();

        let mut failures = 0;
        for (id, handler) in snapshot {
            // Skip handlers removed by an earlier handler in this emission
            if !self.read().contains_key(&id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                failures += 1;
                error!(target: targets::DISPATCH, listener = ?id, "Listener panicked; continuing delivery");
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.read().contains_key(&id)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ListenerId, Handler<T>>> {
        self.handlers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ListenerId, Handler<T>>> {
        self.handlers.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_on_emit_off() {
        let set = ListenerSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        let id = set.on(move |v| seen_clone.lock().unwrap().push(*v));
        assert_eq!(set.len(), 1);

        set.emit(&1);
        assert!(set.off(id));
        assert!(!set.off(id));
        set.emit(&2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let set = ListenerSet::<&'static str>::new();
        let count = Arc::new(AtomicU64::new(0));

        let c1 = Arc::clone(&count);
        set.on(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        set.on(|_| panic!("boom"));
        let c2 = Arc::clone(&count);
        set.on(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        let failures = set.emit(&"msg");
        assert_eq!(failures, 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // The set stays usable after a panic
        set.emit(&"again");
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_listener_removed_mid_emission_is_skipped() {
        let set = Arc::new(ListenerSet::<()>::new());
        let hits = Arc::new(AtomicU64::new(0));
        let victim = Arc::new(Mutex::new(None::<ListenerId>));

        let set_clone = Arc::clone(&set);
        let victim_clone = Arc::clone(&victim);
        set.on(move |_| {
            if let Some(id) = *victim_clone.lock().unwrap() {
                set_clone.off(id);
            }
        });
        let hits_clone = Arc::clone(&hits);
        let id = set.on(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        *victim.lock().unwrap() = Some(id);

        set.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(set.len(), 1);
    }
}
