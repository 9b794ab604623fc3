//! Event emitter for publishing client events to subscribers.
//!
//! Push-based: subscribers register callbacks per [`EventKind`] and are
//! invoked in registration order when a matching event is emitted. A callback
//! that panics is isolated: the panic is logged and the remaining subscribers
//! still receive the event.
//!
//! Registering the same closure twice creates two subscriptions. Closures have
//! no identity to compare, so removal goes through the returned
//! [`SubscriptionId`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::events::{ClientEvent, EventKind};

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync + 'static>;

/// Handle returned by [`EventEmitter::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<EventKind, Vec<(SubscriptionId, Callback)>>,
}

/// Pub/sub registry shared by the client and its handles.
#[derive(Clone, Default)]
pub struct EventEmitter {
    registry: Arc<Mutex<Registry>>,
}

impl EventEmitter {
    /// Create a new EventEmitter with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Callbacks never run under this lock, so poisoning cannot leave it half-updated.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to one kind of event (or `EventKind::All`).
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .subscribers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let Some(list) = registry.subscribers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            registry.subscribers.remove(&kind);
        }
        removed
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// Subscribers of the event's own kind run first, then `All` subscribers.
    /// The registry lock is released before any callback runs, so callbacks
    /// may subscribe or unsubscribe.
    pub fn emit(&self, event: &ClientEvent) {
        let kind = event.kind();
        let callbacks: Vec<(SubscriptionId, Callback)> = {
            let registry = self.registry();
            [kind, EventKind::All]
                .iter()
                .filter_map(|k| registry.subscribers.get(k))
                .flatten()
                .cloned()
                .collect()
        };

        for (id, callback) in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                tracing::error!(
                    event = ?kind,
                    subscription = id.0,
                    panic = panic_message(panic.as_ref()),
                    "Event subscriber panicked; continuing delivery"
                );
            }
        }
    }

    /// Get the number of subscribers for one kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry()
            .subscribers
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Clear all subscribers.
    pub fn clear(&self) {
        self.registry().subscribers.clear();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter(emitter: &EventEmitter, kind: EventKind) -> (SubscriptionId, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        let id = emitter.on(kind, move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (id, count)
    }

    #[test]
    fn test_subscribe_and_emit() {
        let emitter = EventEmitter::new();
        let (_, count) = counter(&emitter, EventKind::Opened);
        let (_, other) = counter(&emitter, EventKind::HeartbeatAck);

        emitter.emit(&ClientEvent::Opened);
        emitter.emit(&ClientEvent::Opened);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(other.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.subscriber_count(EventKind::Opened), 1);
    }

    #[test]
    fn test_all_receives_every_kind() {
        let emitter = EventEmitter::new();
        let (_, count) = counter(&emitter, EventKind::All);

        emitter.emit(&ClientEvent::Opened);
        emitter.emit(&ClientEvent::HeartbeatAck);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_registration_invokes_twice_and_off_removes_one() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU32::new(0));
        let make = |count: Arc<AtomicU32>| {
            move |_: &ClientEvent| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        let first = emitter.on(EventKind::Opened, make(Arc::clone(&count)));
        let _second = emitter.on(EventKind::Opened, make(Arc::clone(&count)));

        emitter.emit(&ClientEvent::Opened);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(emitter.off(EventKind::Opened, first));
        assert!(!emitter.off(EventKind::Opened, first));
        emitter.emit(&ClientEvent::Opened);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let emitter = EventEmitter::new();
        emitter.on(EventKind::Opened, |_event| panic!("faulty handler"));
        let (_, count) = counter(&emitter, EventKind::Opened);

        emitter.emit(&ClientEvent::Opened);
        emitter.emit(&ClientEvent::Opened);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU32::new(0));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let emitter_clone = emitter.clone();
        let slot_clone = Arc::clone(&slot);
        let count_clone = Arc::clone(&count);
        let id = emitter.on(EventKind::Opened, move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot_clone.lock().unwrap() {
                emitter_clone.off(EventKind::Opened, id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        emitter.emit(&ClientEvent::Opened);
        emitter.emit(&ClientEvent::Opened);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.subscriber_count(EventKind::Opened), 0);
    }
}
