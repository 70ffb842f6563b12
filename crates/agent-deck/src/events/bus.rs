use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use agent_deck_protocol::{Channel, EventType};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// A typed event travelling over the bus.
///
/// `channel` is the routing key: the session id for session-specific events,
/// empty otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub channel: String,
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType, channel: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            channel: channel.into(),
            data,
        }
    }

    /// Event not tied to a session.
    pub fn global(event_type: EventType, data: Value) -> Self {
        Self::new(event_type, String::new(), data)
    }

    /// Build an event from any serializable payload. Payloads that fail to
    /// serialize are sent as `null`.
    pub fn with_payload<T: Serialize>(
        event_type: EventType,
        channel: impl Into<String>,
        payload: &T,
    ) -> Self {
        let data = serde_json::to_value(payload).unwrap_or(Value::Null);
        Self::new(event_type, channel, data)
    }

    pub fn bucket(&self) -> Channel {
        self.event_type.bucket()
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<u64, Handler>>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Synchronous fan-out of events to in-process handlers.
///
/// Handlers run on the emitter's thread against a snapshot of the subscriber
/// map, so a handler may subscribe or unsubscribe without deadlocking. A
/// panicking handler is logged and the remaining handlers still run.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. The handler stays registered until
    /// [`BusSubscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, handler: F) -> BusSubscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(handler));

        BusSubscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    pub fn emit(&self, event: Event) {
        let snapshot: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(event_type = %event.event_type, "event handler panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct BusSubscription {
    id: u64,
    bus: Weak<BusInner>,
    active: AtomicBool,
}

impl BusSubscription {
    /// Remove the handler from the bus. Safe to call more than once, and after
    /// the bus itself is gone.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}
