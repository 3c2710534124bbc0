//! In-process event bus with per-subscriber failure isolation.
//!
//! [`EventBus`] delivers every published [`Event`] to all registered
//! handlers, at least once, on the publishing thread. A panicking handler
//! never prevents delivery to the remaining subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use super::Event;

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    name: String,
    handler: Handler,
}

/// Publish/subscribe hub shared via `Arc<EventBus>` across the process.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a diagnostic name.
    pub fn subscribe(&self, name: impl Into<String>, handler: impl Fn(&Event) + Send + Sync + 'static) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers.push(Subscriber {
            name: name.into(),
            handler: Box::new(handler),
        });
    }

    /// Deliver an event to every subscriber, isolating failures.
    pub fn publish(&self, event: &Event) {
        crate::metrics::event_published(event.kind().as_str());
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for subscriber in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(event))).is_err() {
                crate::metrics::event_handler_panicked(&subscriber.name);
                tracing::error!(
                    subscriber = %subscriber.name,
                    kind = event.kind().as_str(),
                    "Event handler panicked; continuing with remaining subscribers"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::events::{ChangeType, EntityKind, Event};

    fn event() -> Event {
        Event::entity(Uuid::new_v4(), EntityKind::Target, "dev01", ChangeType::Updated)
    }

    #[test]
    fn delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe("counter", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish(&event());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        bus.subscribe("exploder", |_| panic!("boom"));
        {
            let delivered = delivered.clone();
            bus.subscribe("survivor", move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish(&event());
        bus.publish(&event());
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(&event());
    }

    #[test]
    fn bulk_events_carry_ids_only() {
        let tenant = Uuid::new_v4();
        let event = Event::bulk(tenant, EntityKind::Action, [1i64, 2, 3], ChangeType::Created);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BulkChanged");
        assert_eq!(json["ids"].as_array().unwrap().len(), 3);
        assert!(json.get("entity").is_none());
    }
}
