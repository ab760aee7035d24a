//! Strip graph events, published through the context's `GraphEmitter`.
//!
//! Collaborators that cache derived data (decoded frames, waveform peaks,
//! thumbnails) subscribe to these instead of reading strips.

use super::navigation::Scope;
use super::strip::StripId;

/// Strips left the graph. Handles they owned are already released.
#[derive(Clone, Debug)]
pub struct StripsFreedEvent {
    pub ids: Vec<StripId>,
}

/// Derived caches for `scope` are stale.
///
/// `range` is `(start, end)` exclusive; `None` means the whole scope.
#[derive(Clone, Debug)]
pub struct CacheInvalidatedEvent {
    pub scope: Scope,
    pub range: Option<(i32, i32)>,
    /// Context generation after the bump
    pub generation: u64,
}

/// One duplication call finished. `sources[i]` was copied to `copies[i]`,
/// nested children included.
#[derive(Clone, Debug)]
pub struct StripsDuplicatedEvent {
    pub sources: Vec<StripId>,
    pub copies: Vec<StripId>,
}

#[derive(Clone, Debug)]
pub struct ScopeChangedEvent {
    pub from: Scope,
    pub to: Scope,
}
