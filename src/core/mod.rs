//! Infrastructure shared by the data model: the event bus.

pub mod event_bus;

pub use event_bus::{downcast_event, BoxedEvent, EventBus, EventEmitter, GraphEmitter};
