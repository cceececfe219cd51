//! Event bus for regime lifecycle notifications
//!
//! Listeners subscribe per event type and receive the wire form of each
//! event. Publishing invokes all matching listeners concurrently; a failing
//! or panicking listener is logged and never reaches the publisher.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::types::{CustomEventType, Event, EventType};

/// Error type for event bus operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Event type name is reserved or empty: {0:?}")]
    InvalidEventType(String),

    #[error("Event bus dropped before the event was published")]
    BusDropped,
}

/// Result type for event bus operations
pub type EventResult<T> = Result<T, EventError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

type Listener = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Typed pub/sub with one-shot waiters
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventType, Vec<Listener>>>,
    waiters: Mutex<HashMap<EventType, Vec<oneshot::Sender<Value>>>>,
    custom: RwLock<HashSet<String>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Add a custom event type to the accepted set
    pub fn register_custom(&self, name: &str) -> EventResult<EventType> {
        let name = name.trim();
        if name.is_empty() || EventType::builtin(name).is_some() {
            return Err(EventError::InvalidEventType(name.to_string()));
        }
        self.custom
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
        debug!(event_type = name, "Custom event type registered");
        Ok(EventType::Custom(CustomEventType(name.to_string())))
    }

    /// Resolve a wire name to a built-in or registered type
    pub fn event_type(&self, name: &str) -> EventResult<EventType> {
        if let Some(builtin) = EventType::builtin(name) {
            return Ok(builtin);
        }
        let custom = self.custom.read().unwrap_or_else(|e| e.into_inner());
        if custom.contains(name) {
            Ok(EventType::Custom(CustomEventType(name.to_string())))
        } else {
            Err(EventError::UnknownEventType(name.to_string()))
        }
    }

    /// Register `listener` for events of `event_type`
    pub fn subscribe<F, Fut>(&self, event_type: EventType, listener: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let listener: Listener = Arc::new(move |payload| listener(payload).boxed());
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type)
            .or_default()
            .push(listener);
    }

    /// Number of listeners registered for a type
    pub fn subscriber_count(&self, event_type: &EventType) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Resolve on the next publish of `event_type`.
    ///
    /// The waiter is registered when this is called, not when the returned
    /// future is first polled. Events published before that are not seen.
    pub fn wait_for(&self, event_type: EventType) -> impl Future<Output = EventResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type)
            .or_default()
            .push(tx);
        async move { rx.await.map_err(|_| EventError::BusDropped) }
    }

    /// Deliver an event to every listener and waiter of its type.
    ///
    /// Returns the number of listeners that handled it successfully.
    pub async fn publish(&self, event: Event) -> usize {
        let event_type = event.event_type().clone();
        let payload = event.to_wire();

        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_type)
            .cloned()
            .unwrap_or_default();

        let outcomes = join_all(listeners.into_iter().map(|listener| {
            let payload = payload.clone();
            AssertUnwindSafe(async move { listener(payload).await }).catch_unwind()
        }))
        .await;

        let mut delivered = 0;
        for outcome in outcomes {
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(event_type = %event_type, error = %e, "Event listener failed"),
                Err(_) => warn!(event_type = %event_type, "Event listener panicked"),
            }
        }

        let waiters = self
            .waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&event_type)
            .unwrap_or_default();
        let woken = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(payload.clone());
        }

        debug!(event_type = %event_type, listeners = delivered, waiters = woken, "Event published");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_listeners_receive_wire_form() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventType::TaskStarted, move |payload| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
                Ok(())
            }
        });

        let delivered = bus
            .publish(Event::new(EventType::TaskStarted, "started").with_task("t-1"))
            .await;
        bus.publish(Event::new(EventType::TaskCompleted, "done")).await;

        assert_eq!(delivered, 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["task_id"], "t-1");
    }

    #[tokio::test]
    async fn test_failing_and_panicking_listeners_are_contained() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::TaskFailed, |_| async { Err(anyhow::anyhow!("sink offline")) });
        bus.subscribe(EventType::TaskFailed, |payload| async move {
            if payload["message"] == "boom" {
                panic!("listener bug");
            }
            Ok(())
        });
        let counter = count.clone();
        bus.subscribe(EventType::TaskFailed, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let delivered = bus.publish(Event::new(EventType::TaskFailed, "boom")).await;
        assert_eq!(delivered, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(&EventType::TaskFailed), 3);
    }

    #[tokio::test]
    async fn test_wait_for_is_one_shot() {
        let bus = EventBus::new();

        // Published before anyone waits: not buffered
        bus.publish(Event::new(EventType::CoupDEtat, "early")).await;

        let waiter = bus.wait_for(EventType::CoupDEtat);
        bus.publish(Event::new(EventType::CoupDEtat, "now")).await;
        let payload = waiter.await.unwrap();
        assert_eq!(payload["message"], "now");

        let late = bus.wait_for(EventType::CoupDEtat);
        drop(bus);
        assert_eq!(late.await, Err(EventError::BusDropped));
    }

    #[test]
    fn test_custom_event_types_must_be_registered() {
        let bus = EventBus::new();
        assert_eq!(
            bus.event_type("audit_logged"),
            Err(EventError::UnknownEventType("audit_logged".into()))
        );
        assert!(bus.register_custom("task_started").is_err());

        let custom = bus.register_custom("audit_logged").unwrap();
        assert!(custom.is_custom());
        assert_eq!(bus.event_type("audit_logged").unwrap(), custom);
        assert_eq!(bus.event_type("task_failed").unwrap(), EventType::TaskFailed);
    }
}
