//! Pub/Sub event bus: the notification channel between the strip graph and
//! the collaborators that cache derived data.
//!
//! - Subscribers register callbacks per event type (invoked immediately)
//! - `emit()` invokes callbacks AND queues the event for `poll()`
//! - Queue overflow evicts the oldest half
//!
//! Callback order is FIFO within one event type. Order across types is
//! undefined.
//!
//! Collaborators never touch strips directly: they subscribe here and read
//! `EditingContext::generation()` to drop stale work.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::warn;

use crate::config::MAX_EVENT_QUEUE;

/// Marker trait for events.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

pub type BoxedEvent = Box<dyn Event>;

/// State shared by a bus and all of its emitters.
#[derive(Default)]
struct Shared {
    subscribers: RwLock<HashMap<TypeId, Vec<Callback>>>,
    queue: Mutex<Vec<BoxedEvent>>,
}

impl Shared {
    fn dispatch(&self, type_id: TypeId, event: BoxedEvent) {
        // Deref to `dyn Event` so `as_any` sees the concrete type, not the box
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        if let Some(cbs) = subscribers.get(&type_id) {
            for cb in cbs {
                cb((*event).as_any());
            }
        }
        drop(subscribers);

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_EVENT_QUEUE {
            let evict_count = queue.len() / 2;
            warn!("Event queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(event);
    }
}

/// Pub/Sub bus with deferred processing.
#[derive(Clone, Default)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of type E. The callback runs inside `emit()`.
    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    pub fn emit<E: Event + Clone>(&self, event: E) {
        self.shared.dispatch(TypeId::of::<E>(), Box::new(event));
    }

    /// Drain all events emitted since the last poll.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Cloneable emit-only handle.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn unsubscribe_all<E: Event>(&self) {
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<E>());
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.shared
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .is_some_and(|v| !v.is_empty())
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Emit-only handle into an [`EventBus`].
#[derive(Clone)]
pub struct EventEmitter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field(
                "subscriber_types",
                &self.shared.subscribers.read().map(|s| s.len()).unwrap_or(0),
            )
            .field("queue_len", &self.shared.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl EventEmitter {
    pub fn emit<E: Event + Clone>(&self, event: E) {
        self.shared.dispatch(TypeId::of::<E>(), Box::new(event));
    }
}

/// Optional emitter held by an editing context. Silent until attached.
#[derive(Clone, Default, Debug)]
pub struct GraphEmitter {
    inner: Option<EventEmitter>,
}

impl GraphEmitter {
    pub fn dummy() -> Self {
        Self { inner: None }
    }

    pub fn from_emitter(emitter: EventEmitter) -> Self {
        Self { inner: Some(emitter) }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    pub fn emit<E: Event + Clone>(&self, event: E) {
        if let Some(emitter) = &self.inner {
            emitter.emit(event);
        }
    }
}

/// Downcast a polled event. Derefs to `dyn Event` first; calling `as_any`
/// on the box itself would yield the box, and the downcast would fail.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
