//! STRIPGRAPH - non-linear timeline strip graph
//!
//! Strips (clips, meta containers, effects) with identity-based
//! cross-references, an editing context with container navigation,
//! reference-preserving duplication and a JSON timeline document.

pub mod config;
pub mod core;
pub mod entities;
pub mod error;

pub use config::Config;
pub use crate::core::event_bus::{downcast_event, EventBus, GraphEmitter};
pub use entities::graph_events::{
    CacheInvalidatedEvent, ScopeChangedEvent, StripsDuplicatedEvent, StripsFreedEvent,
};
pub use entities::{EditingContext, Scope, Strip, StripId, StripKind, TimelineDocument};
pub use error::{Result, StripError};
