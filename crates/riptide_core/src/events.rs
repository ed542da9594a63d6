//! Synchronous publish/subscribe with scoped subscriptions.
//!
//! Listeners run inline on the emitting thread; the relation engine
//! relies on that to react to lifecycle events before the triggering
//! operation finishes. Subscriptions are RAII handles: dropping one
//! detaches the listener. Use [`Subscription::forget`] to keep a
//! listener alive for the lifetime of the listener set.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    id: u64,
    once: bool,
    callback: Callback<E>,
}

struct ListenerSet<E> {
    entries: RwLock<Vec<Entry<E>>>,
    next_id: AtomicU64,
}

/// A set of listeners for events of type `E`.
///
/// Cloning shares the underlying set.
pub struct Listeners<E> {
    inner: Arc<ListenerSet<E>>,
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Listeners {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Listeners<E> {
    /// Creates an empty listener set.
    pub fn new() -> Listeners<E> {
        Listeners {
            inner: Arc::new(ListenerSet {
                entries: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn attach(&self, once: bool, callback: Callback<E>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.write().push(Entry { id, once, callback });

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(set) = weak.upgrade() {
                set.entries.write().retain(|entry| entry.id != id);
            }
        })
    }

    /// Subscribes a listener for every future event.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.attach(false, Arc::new(callback))
    }

    /// Subscribes a listener that detaches after its first event.
    pub fn once<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.attach(true, Arc::new(callback))
    }

    /// Emits an event to every registered listener.
    ///
    /// The listener list is snapshotted first so callbacks may attach
    /// or detach listeners without deadlocking.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = {
            let mut entries = self.inner.entries.write();
            let snapshot = entries
                .iter()
                .map(|entry| Arc::clone(&entry.callback))
                .collect();
            entries.retain(|entry| !entry.once);
            snapshot
        };
        for callback in snapshot {
            callback(event);
        }
    }

    /// Returns the number of attached listeners.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Returns true if no listeners are attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A scoped subscription handle. Dropping it detaches the listener.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Subscription {
        Subscription {
            detach: Some(Box::new(detach)),
        }
    }

    /// Leaks the subscription, keeping the listener attached for the
    /// lifetime of the listener set.
    pub fn forget(mut self) {
        self.detach = None;
    }

    /// Detaches the listener immediately.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_reaches_all_listeners() {
        let listeners: Listeners<u32> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        let _s1 = listeners.subscribe(move |n| {
            c1.fetch_add(*n as usize, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        let _s2 = listeners.subscribe(move |n| {
            c2.fetch_add(*n as usize, Ordering::SeqCst);
        });

        listeners.emit(&3);
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn drop_detaches() {
        let listeners: Listeners<()> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        listeners.emit(&());
        drop(sub);
        listeners.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn once_fires_a_single_time() {
        let listeners: Listeners<()> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let sub = listeners.once(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        listeners.emit(&());
        listeners.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(sub);
    }

    #[test]
    fn listener_may_subscribe_during_emit() {
        let listeners: Listeners<()> = Listeners::new();
        let inner = listeners.clone();
        let sub = listeners.subscribe(move |_| {
            inner.subscribe(|_| {}).forget();
        });
        listeners.emit(&());
        assert_eq!(listeners.len(), 2);
        drop(sub);
    }

    #[test]
    fn default_set_is_empty() {
        let listeners: Listeners<u32> = Listeners::default();
        assert!(listeners.is_empty());
    }

    #[test]
    fn subscriptions_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Subscription>();
        assert_send_sync::<Listeners<u32>>();
    }

    #[test]
    fn forget_keeps_listener() {
        let listeners: Listeners<()> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        listeners
            .subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .forget();
        listeners.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
