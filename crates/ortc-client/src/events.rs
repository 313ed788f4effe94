//! Client events and the observer list that fans them out

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ClientError;

/// Something that happened to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// First successful validation
    Connected,
    /// The session ended and will not be retried
    Disconnected,
    Subscribed(String),
    Unsubscribed(String),
    Exception(ClientError),
    /// A reconnect attempt is starting
    Reconnecting,
    /// Validation succeeded again after a drop
    Reconnected,
}

/// Event callback
pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered list of event observers.
///
/// Emission iterates a snapshot, so handlers may add or remove observers
/// (or call back into the client) while an event is being delivered.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(HandlerId, EventHandler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Deliver `event` to every observer in registration order
    pub fn emit(&self, event: &ClientEvent) {
        let snapshot: Vec<EventHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in snapshot {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.subscribe(move |_| s.lock().push(1));
        let s = seen.clone();
        bus.subscribe(move |_| s.lock().push(2));

        bus.emit(&ClientEvent::Connected);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&ClientEvent::Reconnecting);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&ClientEvent::Reconnecting);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_handler_can_mutate_bus_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();

        bus.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        bus.emit(&ClientEvent::Connected);
        assert_eq!(bus.len(), 2);
    }
}
