//! Strip graph data model.
//!
//! Leaves first: attributes, payload, channels, modifiers, effect handlers,
//! strips. On top of those, the editing context with navigation,
//! duplication and the persisted timeline document.

pub mod attrs;
pub mod channel;
pub mod collab;
pub mod context;
pub mod document;
pub mod duplicate;
pub mod effect;
pub mod graph_events;
pub mod modifier;
pub mod naming;
pub mod navigation;
pub mod payload;
pub mod remap;
pub mod scene;
pub mod strip;

pub use attrs::{AttrValue, Attrs};
pub use channel::{Channel, ChannelList};
pub use collab::{Collaborators, DecodeError, DecodeHandle, MediaDecoder, SoundEngine, SoundHandle};
pub use context::{EditingContext, StripAllocator};
pub use document::TimelineDocument;
pub use effect::{EffectHandler, EffectRegistry};
pub use modifier::{Modifier, ModifierKind};
pub use navigation::{NavFrame, NavigationStack, Scope};
pub use payload::{SourceRange, SourceRef, StripPayload};
pub use remap::RemapTable;
pub use scene::Scene;
pub use strip::{BlendMode, Strip, StripFlags, StripId, StripKind};
