//! Strip: a single timeline entry.
//!
//! # Ownership
//!
//! - A strip exclusively owns its [`StripPayload`]
//! - A container strip (meta) exclusively owns its child list and the
//!   [`ChannelList`] of that nested scope
//!
//! # Cross-references
//!
//! Effect operands, modifier masks and connections are non-owning
//! [`StripId`] relations, resolved on demand through the owning
//! `EditingContext`. Freeing a strip is "remove relation", never a cycle
//! walk. Only the context and the duplication/load relink passes mutate them.
//!
//! # Timing
//!
//! - `start` = frame where source frame 0 would sit
//! - `left_handle()` = `start + start_offset` (first visible frame)
//! - `right_handle()` = `start + len - end_offset` (exclusive end)

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::channel::ChannelList;
use super::collab::SoundHandle;
use super::modifier::Modifier;
use super::payload::StripPayload;

/// Session-unique strip identity. Never reused, never read from a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StripId(Uuid);

impl StripId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for StripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type tag of a strip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StripKind {
    /// Image or movie file
    Clip,
    /// Container holding nested strips
    Meta,
    Effect,
    Adjustment,
    Transition,
    Text,
    Scene,
    MovieClip,
    Sound,
}

impl StripKind {
    pub fn is_container(self) -> bool {
        matches!(self, StripKind::Meta)
    }

    /// Kinds driven by an effect handler.
    pub fn uses_handler(self) -> bool {
        matches!(
            self,
            StripKind::Effect | StripKind::Adjustment | StripKind::Transition | StripKind::Text
        )
    }

    /// Handler used when a strip of this kind is created without naming one.
    pub fn default_effect(self) -> Option<&'static str> {
        match self {
            StripKind::Effect => Some("alpha_over"),
            StripKind::Transition => Some("cross"),
            StripKind::Adjustment => Some("adjustment"),
            StripKind::Text => Some("text"),
            _ => None,
        }
    }

    pub fn default_name(self) -> &'static str {
        match self {
            StripKind::Clip => "Clip",
            StripKind::Meta => "Meta",
            StripKind::Effect => "Effect",
            StripKind::Adjustment => "Adjustment",
            StripKind::Transition => "Transition",
            StripKind::Text => "Text",
            StripKind::Scene => "Scene",
            StripKind::MovieClip => "MovieClip",
            StripKind::Sound => "Sound",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Replace,
    Cross,
    #[default]
    AlphaOver,
    AlphaUnder,
    Add,
    Subtract,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StripFlags {
    pub enabled: bool,
    pub mute: bool,
    pub lock: bool,
}

impl Default for StripFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            mute: false,
            lock: false,
        }
    }
}

/// Nested scope owned by a container strip.
#[derive(Debug, Default)]
pub struct Container {
    pub(crate) strips: Vec<Strip>,
    pub channels: ChannelList,
}

impl Container {
    pub fn new(channels: ChannelList) -> Self {
        Self {
            strips: Vec::new(),
            channels,
        }
    }

    pub fn strips(&self) -> &[Strip] {
        &self.strips
    }
}

#[derive(Debug)]
pub struct Strip {
    pub(crate) id: StripId,
    pub(crate) name: String,
    pub(crate) kind: StripKind,
    pub(crate) effect: Option<String>,
    pub start: i32,
    pub channel: u32,
    pub blend_mode: BlendMode,
    pub blend_alpha: f32,
    pub flags: StripFlags,
    pub payload: StripPayload,
    pub(crate) inputs: [Option<StripId>; 2],
    pub(crate) modifiers: Vec<Modifier>,
    pub(crate) connections: Vec<StripId>,
    pub(crate) container: Option<Container>,
    pub(crate) sound: Option<SoundHandle>,
}

impl Strip {
    /// Bare strip with a default payload. Containers get an empty scope.
    pub(crate) fn new(
        id: StripId,
        kind: StripKind,
        start: i32,
        channel: u32,
        payload: StripPayload,
        channels: Option<ChannelList>,
    ) -> Self {
        Self {
            id,
            name: kind.default_name().to_string(),
            kind,
            effect: None,
            start,
            channel,
            blend_mode: BlendMode::default(),
            blend_alpha: 1.0,
            flags: StripFlags::default(),
            payload,
            inputs: [None, None],
            modifiers: Vec::new(),
            connections: Vec::new(),
            container: if kind.is_container() {
                Some(Container::new(channels.unwrap_or_default()))
            } else {
                None
            },
            sound: None,
        }
    }

    pub fn id(&self) -> StripId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StripKind {
        self.kind
    }

    /// Effect handler name for handler-driven kinds.
    pub fn effect(&self) -> Option<&str> {
        self.effect.as_deref()
    }

    pub fn is_container(&self) -> bool {
        self.container.is_some()
    }

    /// Operand references (effect strips only).
    pub fn inputs(&self) -> [Option<StripId>; 2] {
        self.inputs
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    /// Modifier list for parameter edits. Masks are set through the context.
    pub fn modifiers_mut(&mut self) -> impl Iterator<Item = &mut Modifier> {
        self.modifiers.iter_mut()
    }

    /// Sibling strips that move together with this one.
    pub fn connections(&self) -> &[StripId] {
        &self.connections
    }

    pub fn is_connected_to(&self, other: StripId) -> bool {
        self.connections.contains(&other)
    }

    pub fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }

    /// Children of a container; empty for leaves.
    pub fn children(&self) -> &[Strip] {
        self.container.as_ref().map(|c| c.strips.as_slice()).unwrap_or(&[])
    }

    pub fn children_mut(&mut self) -> &mut [Strip] {
        match self.container.as_mut() {
            Some(c) => c.strips.as_mut_slice(),
            None => &mut [],
        }
    }

    pub fn channels(&self) -> Option<&ChannelList> {
        self.container.as_ref().map(|c| &c.channels)
    }

    pub fn channels_mut(&mut self) -> Option<&mut ChannelList> {
        self.container.as_mut().map(|c| &mut c.channels)
    }

    pub fn sound_handle(&self) -> Option<&SoundHandle> {
        self.sound.as_ref()
    }

    pub fn left_handle(&self) -> i32 {
        self.start + self.payload.range.start_offset
    }

    /// Exclusive end frame.
    pub fn right_handle(&self) -> i32 {
        self.start + self.payload.range.len - self.payload.range.end_offset
    }

    /// Visible length in frames.
    pub fn duration(&self) -> i32 {
        (self.right_handle() - self.left_handle()).max(0)
    }

    pub fn contains_frame(&self, frame: i32) -> bool {
        frame >= self.left_handle() && frame < self.right_handle()
    }

    /// Fit a container's placement to the union of its children's handles.
    /// Empty containers keep their placement.
    pub(crate) fn refresh_bounds(&mut self) {
        let Some(container) = self.container.as_ref() else {
            return;
        };
        let min = container.strips.iter().map(|s| s.left_handle()).min();
        let max = container.strips.iter().map(|s| s.right_handle()).max();
        if let (Some(min), Some(max)) = (min, max) {
            self.start = min;
            self.payload.range.len = (max - min).max(1);
            self.payload.range.start_offset = 0;
            self.payload.range.end_offset = 0;
        }
    }

    /// Hash of everything except identity, name and cross-reference targets.
    ///
    /// Two subtrees with equal content hashes are structurally isomorphic
    /// up to reference topology, which callers compare separately.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash_content(&mut hasher);
        hasher.finish()
    }

    fn hash_content<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.effect.hash(state);
        self.start.hash(state);
        self.channel.hash(state);
        self.blend_mode.hash(state);
        self.blend_alpha.to_bits().hash(state);
        self.flags.hash(state);
        self.payload.hash_into(state);
        self.inputs.iter().map(|i| i.is_some()).for_each(|b| b.hash(state));
        for m in &self.modifiers {
            m.kind.hash(state);
            m.enabled.hash(state);
            m.mask().is_some().hash(state);
            m.params.hash_into(state);
        }
        self.connections.len().hash(state);
        if let Some(container) = &self.container {
            container.strips.len().hash(state);
            for child in &container.strips {
                child.hash_content(state);
            }
        }
    }
}

/// Pre-order iterator over a strip tree.
pub struct StripIter<'a> {
    stack: Vec<std::slice::Iter<'a, Strip>>,
}

impl<'a> StripIter<'a> {
    pub(crate) fn new(strips: &'a [Strip]) -> Self {
        Self {
            stack: vec![strips.iter()],
        }
    }
}

impl<'a> Iterator for StripIter<'a> {
    type Item = &'a Strip;

    fn next(&mut self) -> Option<&'a Strip> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(strip) => {
                    if let Some(container) = &strip.container {
                        self.stack.push(container.strips.iter());
                    }
                    return Some(strip);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

pub(crate) fn find_in(list: &[Strip], id: StripId) -> Option<&Strip> {
    StripIter::new(list).find(|s| s.id == id)
}

pub(crate) fn find_in_mut(list: &mut [Strip], id: StripId) -> Option<&mut Strip> {
    for strip in list.iter_mut() {
        if strip.id == id {
            return Some(strip);
        }
        if let Some(container) = strip.container.as_mut() {
            if let Some(found) = find_in_mut(&mut container.strips, id) {
                return Some(found);
            }
        }
    }
    None
}

/// Visit every strip mutably, parents before children.
pub(crate) fn visit_mut<F: FnMut(&mut Strip)>(list: &mut [Strip], f: &mut F) {
    for strip in list.iter_mut() {
        f(strip);
        if let Some(container) = strip.container.as_mut() {
            visit_mut(&mut container.strips, f);
        }
    }
}

/// Ancestor container ids of `id`, outermost first. `None` if absent.
pub(crate) fn path_to(list: &[Strip], id: StripId) -> Option<Vec<StripId>> {
    for strip in list {
        if strip.id == id {
            return Some(Vec::new());
        }
        if let Some(container) = &strip.container {
            if let Some(mut path) = path_to(&container.strips, id) {
                path.insert(0, strip.id);
                return Some(path);
            }
        }
    }
    None
}
