//! Typed event fan-out.
//!
//! Subscribers register per event name (or for every event) and are invoked
//! synchronously, in subscription order, on the thread that publishes.
//! Handlers may subscribe or unsubscribe from inside a callback; the change
//! applies from the next publish on.

use std::sync::{Arc, PoisonError, RwLock};

use crate::types::Event;

/// Event handler type.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    /// `None` receives every event.
    event: Option<String>,
    handler: EventHandler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Registry of subscribers keyed by event name. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, event: Option<String>, handler: EventHandler) -> SubscriptionId {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.subscribers.push(Subscriber { id, event, handler });
        id
    }

    /// Subscribe to one event name, e.g. `"message.new"`.
    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(Some(event.into()), Arc::new(handler))
    }

    /// Subscribe to every event.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let before = registry.subscribers.len();
        registry.subscribers.retain(|s| s.id != id);
        registry.subscribers.len() != before
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    /// Deliver an event to its subscribers in subscription order.
    pub fn publish(&self, event: &Event) {
        let name = event.name();
        let handlers: Vec<EventHandler> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .subscribers
                .iter()
                .filter(|s| s.event.as_deref().map_or(true, |e| e == name))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };
        log::trace!("publishing {} to {} subscriber(s)", name, handlers.len());
        for handler in handlers {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_delivers_by_name_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.subscribe("qr", move |e| s.lock().unwrap().push(format!("first:{}", e.name())));
        let s = seen.clone();
        bus.subscribe("qr_expired", move |e| s.lock().unwrap().push(format!("other:{}", e.name())));
        let s = seen.clone();
        bus.subscribe_all(move |e| s.lock().unwrap().push(format!("all:{}", e.name())));
        let s = seen.clone();
        bus.subscribe("qr", move |e| s.lock().unwrap().push(format!("second:{}", e.name())));

        bus.publish(&Event::Qr("ref,pk,id".into()));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:qr", "all:qr", "second:qr"]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = bus.subscribe("disconnected", move |_| *c.lock().unwrap() += 1);

        bus.publish(&Event::Disconnected);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&Event::Disconnected);
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.subscribe("disconnected", move |_| {
            inner.subscribe("disconnected", |_| {});
        });
        bus.publish(&Event::Disconnected);
        assert_eq!(bus.subscriber_count(), 2);
    }
}
