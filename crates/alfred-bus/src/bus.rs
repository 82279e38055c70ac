//! Single-process pub/sub with typed and wildcard subscriptions.
//!
//! Publishers never block on subscribers: every `(event, handler)` pair is
//! dispatched on its own Tokio task, and a panicking handler is caught and
//! logged without affecting its peers. `close` drains in-flight dispatches.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::Notify;
use tracing::{debug, error};

use crate::event::{Event, EventType};

/// Subscriber callback. Handlers must not block; spawn their own tasks for
/// slow work.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: u64,
    handler: EventHandler,
}

struct BusInner {
    typed: RwLock<HashMap<EventType, Vec<Subscription>>>,
    all: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
}

/// The in-process event bus.
///
/// Cheap to clone — all clones share the same subscription state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                typed: RwLock::new(HashMap::new()),
                all: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Publish an event to every matching subscriber.
    ///
    /// No-op once the bus is closed. The subscriber lists are snapshotted
    /// under the read lock before any handler runs, so subscribe/unsubscribe
    /// concurrent with a publish is safe (an in-flight dispatch may still
    /// reach a just-removed handler).
    pub fn publish(&self, event: Event) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut handlers: Vec<EventHandler> = Vec::new();
        {
            let typed = self.inner.typed.read().unwrap();
            if let Some(subs) = typed.get(&event.event_type) {
                handlers.extend(subs.iter().map(|s| Arc::clone(&s.handler)));
            }
        }
        {
            let all = self.inner.all.read().unwrap();
            handlers.extend(all.iter().map(|s| Arc::clone(&s.handler)));
        }

        if handlers.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for handler in handlers {
            self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(&self.inner);
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                let result = catch_unwind(AssertUnwindSafe(|| handler(&event)));
                if let Err(panic) = result {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "<non-string panic>".to_string());
                    error!(
                        event_type = %event.event_type,
                        panic = %detail,
                        "event handler panicked"
                    );
                }
                if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    inner.drained.notify_waiters();
                }
            });
        }
    }

    /// Subscribe to a single event type.
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let sub = Subscription {
            id,
            handler: Arc::new(handler),
        };
        self.inner
            .typed
            .write()
            .unwrap()
            .entry(event_type)
            .or_default()
            .push(sub);
        debug!(id, event_type = %event_type, "bus subscription added");
        SubscriptionHandle {
            bus: Arc::downgrade(&self.inner),
            id,
            event_type: Some(event_type),
        }
    }

    /// Subscribe to every event type.
    pub fn subscribe_all(
        &self,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let sub = Subscription {
            id,
            handler: Arc::new(handler),
        };
        self.inner.all.write().unwrap().push(sub);
        debug!(id, "bus wildcard subscription added");
        SubscriptionHandle {
            bus: Arc::downgrade(&self.inner),
            id,
            event_type: None,
        }
    }

    /// Close the bus and wait for all dispatched handlers to finish.
    ///
    /// Idempotent: the first call drains, later calls return immediately.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
    }

    #[cfg(test)]
    fn typed_len(&self, event_type: EventType) -> usize {
        self.inner
            .typed
            .read()
            .unwrap()
            .get(&event_type)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a subscription when invoked. Dropping the handle without calling
/// [`SubscriptionHandle::unsubscribe`] leaves the subscription in place.
pub struct SubscriptionHandle {
    bus: Weak<BusInner>,
    id: u64,
    event_type: Option<EventType>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        match self.event_type {
            Some(event_type) => {
                let mut typed = inner.typed.write().unwrap();
                if let Some(subs) = typed.get_mut(&event_type) {
                    subs.retain(|s| s.id != self.id);
                }
            }
            None => {
                inner.all.write().unwrap().retain(|s| s.id != self.id);
            }
        }
        debug!(id = self.id, "bus subscription removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn ev(event_type: EventType) -> Event {
        Event::new(event_type, serde_json::json!({}))
    }

    #[tokio::test]
    async fn typed_subscriber_fires_once_per_publish() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe(EventType::MessageSent, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(ev(EventType::MessageSent));
        bus.publish(ev(EventType::MessageReceived));
        bus.close().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wildcard_subscriber_sees_everything() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(ev(EventType::MessageSent));
        bus.publish(ev(EventType::ChatAborted));
        bus.publish(ev(EventType::ProcessKilled));
        bus.close().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_affect_peers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::MessageSent, |_| {
            panic!("subscriber bug");
        });
        let c = Arc::clone(&count);
        bus.subscribe(EventType::MessageSent, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(ev(EventType::MessageSent));
        bus.close().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_after_close_is_noop() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.close().await;
        bus.publish(ev(EventType::MessageSent));
        // Second close returns immediately.
        bus.close().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_waits_for_in_flight_handlers() {
        let bus = EventBus::new();
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        bus.subscribe_all(move |_| {
            std::thread::sleep(Duration::from_millis(50));
            d.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(ev(EventType::MessageSent));
        bus.close().await;

        // close must not return before the handler completed
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_by_id() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = bus.subscribe(EventType::MessageSent, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.typed_len(EventType::MessageSent), 1);

        handle.unsubscribe();
        assert_eq!(bus.typed_len(EventType::MessageSent), 0);

        bus.publish(ev(EventType::MessageSent));
        bus.close().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
