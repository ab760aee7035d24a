//! Container drill-down.
//!
//! The [`NavigationStack`] records which meta strip is being edited. An empty
//! stack means the root scope is active. Each frame remembers the scope that
//! was active before the push, so popping restores it exactly.
//!
//! # Invariants
//!
//! - With a non-empty stack, the active scope is the top frame's container
//! - Every frame's container exists in the tree; freeing a viewed container
//!   truncates the stack at that frame

use std::collections::HashSet;

use log::{debug, warn};

use super::context::EditingContext;
use super::graph_events::ScopeChangedEvent;
use super::strip::StripId;
use crate::error::{Result, StripError};

/// A strip list with its channels: the root or one container's interior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    #[default]
    Root,
    Container(StripId),
}

impl Scope {
    pub fn container(&self) -> Option<StripId> {
        match self {
            Scope::Root => None,
            Scope::Container(id) => Some(*id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavFrame {
    pub container: StripId,
    /// Scope active before this frame was pushed
    pub previous: Scope,
    /// Container handles `(left, right)` at the moment of entry
    pub view_range: (i32, i32),
}

#[derive(Clone, Debug, Default)]
pub struct NavigationStack {
    frames: Vec<NavFrame>,
}

impl NavigationStack {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<&NavFrame> {
        self.frames.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NavFrame> {
        self.frames.iter()
    }

    pub fn contains(&self, container: StripId) -> bool {
        self.frames.iter().any(|f| f.container == container)
    }

    /// Viewed containers, outermost first.
    pub fn path(&self) -> Vec<StripId> {
        self.frames.iter().map(|f| f.container).collect()
    }

    pub(crate) fn push(&mut self, frame: NavFrame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<NavFrame> {
        self.frames.pop()
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    /// Drop frame `index` and everything above it. Returns the dropped frame.
    pub(crate) fn truncate_at(&mut self, index: usize) -> Option<NavFrame> {
        if index >= self.frames.len() {
            return None;
        }
        let frame = self.frames[index].clone();
        self.frames.truncate(index);
        Some(frame)
    }
}

impl EditingContext {
    pub fn navigation(&self) -> &NavigationStack {
        &self.nav
    }

    /// Enter a container: its children become the active scope.
    pub fn push_container(&mut self, id: StripId) -> Result<()> {
        let from = self.active_scope;
        self.push_frame(id)?;
        self.emitter.emit(ScopeChangedEvent {
            from,
            to: self.active_scope,
        });
        Ok(())
    }

    /// Leave the innermost container and return it.
    ///
    /// Fails with `StackUnderflow` on an empty stack; check
    /// `navigation().is_empty()` first.
    pub fn pop_container(&mut self) -> Result<StripId> {
        let frame = self.nav.pop().ok_or(StripError::StackUnderflow)?;
        let from = self.active_scope;
        self.active_scope = frame.previous;
        debug!("Left container {} (depth {})", frame.container, self.nav.depth());
        self.emitter.emit(ScopeChangedEvent {
            from,
            to: self.active_scope,
        });
        Ok(frame.container)
    }

    /// Rebuild the stack so it reflects the real nesting path down to
    /// `target`. `None` returns to the root scope with no frames.
    pub fn set_target(&mut self, target: Option<StripId>) -> Result<()> {
        let mut chain = Vec::new();
        if let Some(id) = target {
            let strip = self.find(id).ok_or(StripError::UnknownStrip(id))?;
            if !strip.is_container() {
                return Err(StripError::NotAContainer(id));
            }
            chain = self.ancestors(id).unwrap_or_default();
            chain.push(id);
        }

        let from = self.active_scope;
        self.nav.clear();
        self.active_scope = Scope::Root;
        for container in chain {
            self.push_frame(container)?;
        }
        if from != self.active_scope {
            self.emitter.emit(ScopeChangedEvent {
                from,
                to: self.active_scope,
            });
        }
        Ok(())
    }

    pub(crate) fn push_frame(&mut self, id: StripId) -> Result<()> {
        let strip = self.find(id).ok_or(StripError::UnknownStrip(id))?;
        if !strip.is_container() {
            return Err(StripError::NotAContainer(id));
        }
        if self.nav.contains(id) {
            return Err(StripError::InvalidReference(format!(
                "container {} is already being viewed",
                id
            )));
        }
        let view_range = (strip.left_handle(), strip.right_handle());
        self.nav.push(NavFrame {
            container: id,
            previous: self.active_scope,
            view_range,
        });
        self.active_scope = Scope::Container(id);
        debug!("Entered container {} (depth {})", id, self.nav.depth());
        Ok(())
    }

    /// Drop frames whose container was freed and fall back to the scope
    /// that was active below them.
    pub(crate) fn truncate_nav_for(&mut self, freed: &HashSet<StripId>) {
        let Some(index) = self.nav.iter().position(|f| freed.contains(&f.container)) else {
            return;
        };
        if let Some(frame) = self.nav.truncate_at(index) {
            warn!(
                "Viewed container {} was freed, navigation truncated to depth {}",
                frame.container, index
            );
            let from = self.active_scope;
            self.active_scope = frame.previous;
            self.emitter.emit(ScopeChangedEvent {
                from,
                to: self.active_scope,
            });
        }
    }
}
