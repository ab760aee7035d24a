//! EditingContext: root of the strip graph.
//!
//! Owns the top-level strip list, the root channel list, the navigation
//! stack, the active strip and the per-source user counts. All graph
//! mutation goes through here; it is single-owner and not `Sync`-shared.
//!
//! # Scopes
//!
//! A [`Scope`] names one strip list: the root or the interior of a meta strip.
//! `create`, `duplicate_to` and `invalidate` take the scope explicitly;
//! `duplicate` uses the active scope (top of the navigation stack).
//!
//! # Freeing
//!
//! Freeing a strip removes it from its list, then walks the detached subtree
//! post-order releasing handler state, decode and sound handles and source
//! users. Afterwards every reference to a freed id is dropped from the
//! remaining graph: connections are severed on partners, operands and masks
//! are nulled, the active strip is cleared and the navigation stack truncated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, trace, warn};

use super::channel::ChannelList;
use super::collab::{Collaborators, MediaDecoder, SoundEngine};
use super::effect::EffectRegistry;
use super::graph_events::{CacheInvalidatedEvent, StripsFreedEvent};
use super::modifier::{Modifier, ModifierKind};
use super::naming;
use super::navigation::{NavigationStack, Scope};
use super::payload::{SourceRef, StripPayload};
use super::strip::{self, Strip, StripId, StripIter, StripKind};
use crate::config::Config;
use crate::core::event_bus::GraphEmitter;
use crate::error::{Result, StripError};

/// Counts live strips against the configured ceiling.
#[derive(Debug, Clone, Default)]
pub struct StripAllocator {
    live: usize,
    limit: Option<usize>,
}

impl StripAllocator {
    pub fn new(limit: Option<usize>) -> Self {
        Self { live: 0, limit }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Reserve one strip slot.
    pub(crate) fn allocate(&mut self) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.live >= limit {
                return Err(StripError::AllocationFailure {
                    requested: self.live + 1,
                    limit,
                });
            }
        }
        self.live += 1;
        Ok(())
    }

    pub(crate) fn release(&mut self, count: usize) {
        self.live = self.live.saturating_sub(count);
    }
}

#[derive(Debug)]
pub struct EditingContext {
    pub(crate) config: Config,
    pub(crate) strips: Vec<Strip>,
    pub(crate) channels: ChannelList,
    pub(crate) nav: NavigationStack,
    pub(crate) active_scope: Scope,
    pub(crate) active_strip: Option<StripId>,
    pub(crate) allocator: StripAllocator,
    pub(crate) users: HashMap<SourceRef, usize>,
    pub(crate) effects: Arc<EffectRegistry>,
    pub(crate) generation: u64,
    pub(crate) emitter: GraphEmitter,
}

impl Default for EditingContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl EditingContext {
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, EffectRegistry::builtin())
    }

    /// Context using a custom effect registry.
    pub fn with_registry(config: Config, effects: Arc<EffectRegistry>) -> Self {
        debug!(
            "EditingContext::new: {} channels, strip limit {:?}",
            config.channel_count, config.strip_limit
        );
        Self {
            channels: ChannelList::with_count(config.channel_count),
            allocator: StripAllocator::new(config.strip_limit),
            config,
            strips: Vec::new(),
            nav: NavigationStack::new(),
            active_scope: Scope::Root,
            active_strip: None,
            users: HashMap::new(),
            effects,
            generation: 0,
            emitter: GraphEmitter::dummy(),
        }
    }

    pub fn set_emitter(&mut self, emitter: GraphEmitter) {
        self.emitter = emitter;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    pub fn allocator(&self) -> &StripAllocator {
        &self.allocator
    }

    /// Bumped on every invalidation. Background work tagged with an older
    /// generation is stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ========== Lookup ==========

    /// Top-level strips.
    pub fn strips(&self) -> &[Strip] {
        &self.strips
    }

    pub fn channels(&self) -> &ChannelList {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelList {
        &mut self.channels
    }

    pub fn active_scope(&self) -> Scope {
        self.active_scope
    }

    /// Strips of the scope currently being edited.
    pub fn active_strips(&self) -> &[Strip] {
        self.scope_strips(self.active_scope).unwrap_or(&[])
    }

    pub fn scope_strips(&self, scope: Scope) -> Result<&[Strip]> {
        match scope {
            Scope::Root => Ok(&self.strips),
            Scope::Container(id) => Ok(self.container_of(id)?.strips()),
        }
    }

    pub fn scope_channels(&self, scope: Scope) -> Result<&ChannelList> {
        match scope {
            Scope::Root => Ok(&self.channels),
            Scope::Container(id) => Ok(&self.container_of(id)?.channels),
        }
    }

    pub fn scope_channels_mut(&mut self, scope: Scope) -> Result<&mut ChannelList> {
        match scope {
            Scope::Root => Ok(&mut self.channels),
            Scope::Container(id) => {
                let strip = strip::find_in_mut(&mut self.strips, id)
                    .ok_or(StripError::UnknownStrip(id))?;
                strip.channels_mut().ok_or(StripError::NotAContainer(id))
            }
        }
    }

    /// Every strip, pre-order, nested ones included.
    pub fn iter(&self) -> StripIter<'_> {
        StripIter::new(&self.strips)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.strips.is_empty()
    }

    pub fn find(&self, id: StripId) -> Option<&Strip> {
        strip::find_in(&self.strips, id)
    }

    /// Mutable access to placement and payload fields. Cross-references are
    /// only editable through context methods.
    pub fn find_mut(&mut self, id: StripId) -> Option<&mut Strip> {
        strip::find_in_mut(&mut self.strips, id)
    }

    pub fn contains(&self, id: StripId) -> bool {
        self.find(id).is_some()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Strip> {
        self.iter().find(|s| s.name() == name)
    }

    /// Enclosing containers of `id`, outermost first.
    pub fn ancestors(&self, id: StripId) -> Option<Vec<StripId>> {
        strip::path_to(&self.strips, id)
    }

    /// Scope whose list holds `id`.
    pub fn parent_scope(&self, id: StripId) -> Option<Scope> {
        self.ancestors(id)
            .map(|path| path.last().map_or(Scope::Root, |c| Scope::Container(*c)))
    }

    fn container_of(&self, id: StripId) -> Result<&strip::Container> {
        self.find(id)
            .ok_or(StripError::UnknownStrip(id))?
            .container()
            .ok_or(StripError::NotAContainer(id))
    }

    pub(crate) fn list_for_scope_mut(&mut self, scope: Scope) -> Result<&mut Vec<Strip>> {
        match scope {
            Scope::Root => Ok(&mut self.strips),
            Scope::Container(id) => {
                let strip = strip::find_in_mut(&mut self.strips, id)
                    .ok_or(StripError::UnknownStrip(id))?;
                strip
                    .container
                    .as_mut()
                    .map(|c| &mut c.strips)
                    .ok_or(StripError::NotAContainer(id))
            }
        }
    }

    // ========== Creation ==========

    /// Append a new strip with a fresh identity and a default payload.
    ///
    /// Handler-driven kinds get their default effect (`cross` for
    /// transitions, `alpha_over` for effects). Fails on allocator exhaustion
    /// or an unknown scope; nothing changes in either case.
    pub fn create(
        &mut self,
        scope: Scope,
        start: i32,
        channel: u32,
        kind: StripKind,
    ) -> Result<StripId> {
        self.create_strip(scope, start, channel, kind, kind.default_effect())
    }

    /// Create an effect-like strip for the named handler and wire its operands.
    ///
    /// The kind follows the handler: transitions become `Transition`, `text`
    /// and `adjustment` their own kinds, everything else `Effect`.
    pub fn create_effect(
        &mut self,
        scope: Scope,
        start: i32,
        channel: u32,
        effect: &str,
        inputs: &[StripId],
    ) -> Result<StripId> {
        let handler = Arc::clone(self.effects.resolve(effect)?);
        self.check_operands(effect, handler.operand_count(), inputs, None)?;
        let kind = match effect {
            "text" => StripKind::Text,
            "adjustment" => StripKind::Adjustment,
            _ if handler.is_transition() => StripKind::Transition,
            _ => StripKind::Effect,
        };
        let id = self.create_strip(scope, start, channel, kind, Some(effect))?;
        if let Some(strip) = self.find_mut(id) {
            strip.inputs = [inputs.first().copied(), inputs.get(1).copied()];
        }
        Ok(id)
    }

    fn create_strip(
        &mut self,
        scope: Scope,
        start: i32,
        channel: u32,
        kind: StripKind,
        effect: Option<&str>,
    ) -> Result<StripId> {
        let handler = match effect {
            Some(name) => Some(Arc::clone(self.effects.resolve(name)?)),
            None => None,
        };
        self.scope_strips(scope)?;

        let name = self.disambiguate(kind.default_name(), None);
        self.allocator.allocate()?;

        let id = StripId::new();
        let mut payload = StripPayload::new(self.config.default_strip_len);
        if let Some(handler) = &handler {
            handler.init(&mut payload);
        }
        let channels = kind
            .is_container()
            .then(|| ChannelList::with_count(self.config.channel_count));
        let mut strip = Strip::new(id, kind, start, channel, payload, channels);
        strip.name = name;
        strip.effect = effect.map(str::to_string);
        let range = (strip.left_handle(), strip.right_handle());

        match self.list_for_scope_mut(scope) {
            Ok(list) => list.push(strip),
            Err(e) => {
                self.allocator.release(1);
                return Err(e);
            }
        }
        debug!("Created {:?} strip {} at frame {} channel {}", kind, id, start, channel);

        self.update_container_bounds(scope);
        self.invalidate(scope, Some(range));
        Ok(id)
    }

    // ========== Cross-references ==========

    /// Replace the operands of an effect strip.
    ///
    /// The operand count must match the handler, and every operand must be
    /// another strip of this context.
    pub fn set_inputs(&mut self, id: StripId, inputs: &[StripId]) -> Result<()> {
        let strip = self.find(id).ok_or(StripError::UnknownStrip(id))?;
        let effect = strip
            .effect()
            .ok_or_else(|| {
                StripError::InvalidReference(format!("strip {} has no effect handler", id))
            })?
            .to_string();
        let expected = self.effects.resolve(&effect)?.operand_count();
        self.check_operands(&effect, expected, inputs, Some(id))?;

        if let Some(strip) = self.find_mut(id) {
            strip.inputs = [inputs.first().copied(), inputs.get(1).copied()];
        }
        self.invalidate_strip(id);
        Ok(())
    }

    fn check_operands(
        &self,
        effect: &str,
        expected: usize,
        inputs: &[StripId],
        owner: Option<StripId>,
    ) -> Result<()> {
        if inputs.len() != expected {
            return Err(StripError::OperandCount {
                effect: effect.to_string(),
                expected,
                got: inputs.len(),
            });
        }
        for input in inputs {
            if Some(*input) == owner {
                return Err(StripError::InvalidReference(format!(
                    "effect {} cannot use itself as operand",
                    input
                )));
            }
            if !self.contains(*input) {
                return Err(StripError::InvalidReference(format!(
                    "operand {} is not in this context",
                    input
                )));
            }
        }
        Ok(())
    }

    /// Connect two sibling strips. Both halves are written together.
    pub fn connect(&mut self, a: StripId, b: StripId) -> Result<()> {
        if a == b {
            return Err(StripError::InvalidReference(format!(
                "strip {} cannot connect to itself",
                a
            )));
        }
        let scope_a = self.parent_scope(a).ok_or(StripError::UnknownStrip(a))?;
        let scope_b = self.parent_scope(b).ok_or(StripError::UnknownStrip(b))?;
        if scope_a != scope_b {
            return Err(StripError::InvalidReference(format!(
                "strips {} and {} are not siblings",
                a, b
            )));
        }
        for (from, to) in [(a, b), (b, a)] {
            if let Some(strip) = self.find_mut(from) {
                if !strip.connections.contains(&to) {
                    strip.connections.push(to);
                }
            }
        }
        trace!("Connected {} <-> {}", a, b);
        Ok(())
    }

    /// Remove every connection of `id`, on both sides.
    pub fn disconnect(&mut self, id: StripId) -> Result<()> {
        let partners = match self.find_mut(id) {
            Some(strip) => std::mem::take(&mut strip.connections),
            None => return Err(StripError::UnknownStrip(id)),
        };
        for partner in partners {
            if let Some(strip) = self.find_mut(partner) {
                strip.connections.retain(|c| *c != id);
            }
        }
        Ok(())
    }

    /// Remove a single connection, on both sides.
    pub fn disconnect_pair(&mut self, a: StripId, b: StripId) -> Result<()> {
        for (from, to) in [(a, b), (b, a)] {
            let strip = self.find_mut(from).ok_or(StripError::UnknownStrip(from))?;
            strip.connections.retain(|c| *c != to);
        }
        Ok(())
    }

    /// Append a modifier with default parameters. Returns its index.
    pub fn add_modifier(&mut self, id: StripId, kind: ModifierKind) -> Result<usize> {
        let strip = self.find_mut(id).ok_or(StripError::UnknownStrip(id))?;
        strip.modifiers.push(Modifier::new(kind));
        let index = strip.modifiers.len() - 1;
        self.invalidate_strip(id);
        Ok(index)
    }

    pub fn remove_modifier(&mut self, id: StripId, index: usize) -> Result<Modifier> {
        let strip = self.find_mut(id).ok_or(StripError::UnknownStrip(id))?;
        if index >= strip.modifiers.len() {
            return Err(StripError::InvalidReference(format!(
                "strip {} has no modifier {}",
                id, index
            )));
        }
        let removed = strip.modifiers.remove(index);
        self.invalidate_strip(id);
        Ok(removed)
    }

    /// Point a modifier at a mask strip (or clear it with `None`).
    pub fn set_modifier_mask(
        &mut self,
        id: StripId,
        index: usize,
        mask: Option<StripId>,
    ) -> Result<()> {
        if let Some(mask) = mask {
            if mask == id {
                return Err(StripError::InvalidReference(format!(
                    "strip {} cannot mask itself",
                    id
                )));
            }
            if !self.contains(mask) {
                return Err(StripError::InvalidReference(format!(
                    "mask {} is not in this context",
                    mask
                )));
            }
        }
        let strip = self.find_mut(id).ok_or(StripError::UnknownStrip(id))?;
        let modifier = strip
            .modifiers
            .get_mut(index)
            .ok_or_else(|| {
                StripError::InvalidReference(format!("strip {} has no modifier {}", id, index))
            })?;
        modifier.set_mask(mask);
        self.invalidate_strip(id);
        Ok(())
    }

    // ========== Active strip / naming ==========

    pub fn active_strip(&self) -> Option<StripId> {
        self.active_strip
    }

    pub fn set_active_strip(&mut self, id: Option<StripId>) -> Result<()> {
        if let Some(id) = id {
            if !self.contains(id) {
                return Err(StripError::UnknownStrip(id));
            }
        }
        self.active_strip = id;
        Ok(())
    }

    /// Rename a strip. With unique names on, a taken name gets a `.NNN`
    /// suffix. Returns the name actually assigned.
    pub fn rename(&mut self, id: StripId, name: &str) -> Result<String> {
        if !self.contains(id) {
            return Err(StripError::UnknownStrip(id));
        }
        let name = self.disambiguate(name, Some(id));
        if let Some(strip) = self.find_mut(id) {
            strip.name = name.clone();
        }
        Ok(name)
    }

    /// All names in use, optionally ignoring one strip.
    pub(crate) fn taken_names(&self, except: Option<StripId>) -> HashSet<String> {
        self.iter()
            .filter(|s| Some(s.id()) != except)
            .map(|s| s.name().to_string())
            .collect()
    }

    fn disambiguate(&self, wanted: &str, except: Option<StripId>) -> String {
        if !self.config.unique_names {
            return wanted.to_string();
        }
        naming::unique_name(wanted, &self.taken_names(except))
    }

    // ========== Sources / users ==========

    /// Number of strips drawing from `source`.
    pub fn users(&self, source: &SourceRef) -> usize {
        self.users.get(source).copied().unwrap_or(0)
    }

    pub(crate) fn add_user(&mut self, source: &SourceRef) {
        *self.users.entry(source.clone()).or_insert(0) += 1;
    }

    pub(crate) fn remove_user(&mut self, source: &SourceRef) {
        if let Some(count) = self.users.get_mut(source) {
            *count -= 1;
            if *count == 0 {
                self.users.remove(source);
            }
        }
    }

    /// Point a strip at new source data. A cached decode handle for the old
    /// source is dropped without a decoder; see
    /// [`set_source_with`](Self::set_source_with).
    pub fn set_source(&mut self, id: StripId, source: Option<SourceRef>) -> Result<()> {
        self.set_source_with(id, source, &mut Collaborators::none())
    }

    /// Point a strip at new source data, closing a cached decode handle for
    /// the old source through `collab`.
    pub fn set_source_with(
        &mut self,
        id: StripId,
        source: Option<SourceRef>,
        collab: &mut Collaborators<'_>,
    ) -> Result<()> {
        let strip = self.find_mut(id).ok_or(StripError::UnknownStrip(id))?;
        let old = std::mem::replace(&mut strip.payload.source, source.clone());
        if let Some(handle) = strip.payload.take_decode() {
            collab.release_decode(handle);
        }
        if let Some(old) = &old {
            self.remove_user(old);
        }
        if let Some(new) = &source {
            self.add_user(new);
        }
        self.invalidate_strip(id);
        Ok(())
    }

    // ========== Collaborators ==========

    /// Open the decode handle of a clip or movie-clip strip with a file
    /// source, if not open yet. Returns whether a handle is now cached.
    pub fn ensure_decoded(&mut self, id: StripId, decoder: &mut dyn MediaDecoder) -> Result<bool> {
        let strip = self.find_mut(id).ok_or(StripError::UnknownStrip(id))?;
        if !matches!(strip.kind(), StripKind::Clip | StripKind::MovieClip) {
            return Ok(false);
        }
        if strip.payload.decode_handle().is_some() {
            return Ok(true);
        }
        let Some(SourceRef::File(path)) = &strip.payload.source else {
            return Ok(false);
        };
        let handle = decoder.open(path)?;
        trace!("Opened decode handle {} for {}", handle.raw(), path.display());
        strip.payload.set_decode(handle);
        Ok(true)
    }

    /// Attach a sound strip to the sound engine. Already attached strips
    /// keep their handle.
    pub fn attach_sound(&mut self, id: StripId, engine: &mut dyn SoundEngine) -> Result<()> {
        let strip = self.find_mut(id).ok_or(StripError::UnknownStrip(id))?;
        if strip.kind() != StripKind::Sound {
            return Err(StripError::InvalidReference(format!("strip {} is not a sound strip", id)));
        }
        if strip.sound.is_some() {
            return Ok(());
        }
        let source = strip
            .payload
            .source
            .as_ref()
            .ok_or_else(|| {
                StripError::InvalidReference(format!("sound strip {} has no source", id))
            })?;
        strip.sound = Some(engine.attach(source));
        Ok(())
    }

    pub fn detach_sound(&mut self, id: StripId, engine: &mut dyn SoundEngine) -> Result<()> {
        let strip = self.find_mut(id).ok_or(StripError::UnknownStrip(id))?;
        if let Some(handle) = strip.sound.take() {
            engine.detach(handle);
        }
        Ok(())
    }

    /// Locked by its own flag or by its channel in the owning scope.
    pub fn is_strip_locked(&self, id: StripId) -> bool {
        self.strip_and_channels(id)
            .is_some_and(|(s, channels)| s.flags.lock || channels.is_locked(s.channel))
    }

    pub fn is_strip_muted(&self, id: StripId) -> bool {
        self.strip_and_channels(id)
            .is_some_and(|(s, channels)| s.flags.mute || channels.is_muted(s.channel))
    }

    fn strip_and_channels(&self, id: StripId) -> Option<(&Strip, &ChannelList)> {
        let strip = self.find(id)?;
        let scope = self.parent_scope(id)?;
        let channels = self.scope_channels(scope).ok()?;
        Some((strip, channels))
    }

    // ========== Invalidation ==========

    /// Mark derived caches for `scope` stale and bump the generation.
    pub fn invalidate(&mut self, scope: Scope, range: Option<(i32, i32)>) {
        self.generation += 1;
        trace!("Invalidate {:?} {:?} -> generation {}", scope, range, self.generation);
        self.emitter.emit(CacheInvalidatedEvent {
            scope,
            range,
            generation: self.generation,
        });
    }

    fn invalidate_strip(&mut self, id: StripId) {
        let range = self.find(id).map(|s| (s.left_handle(), s.right_handle()));
        let scope = self.parent_scope(id).unwrap_or_default();
        self.invalidate(scope, range);
    }

    /// Refit every container from `scope` up to the root to its children.
    pub fn update_container_bounds(&mut self, scope: Scope) {
        let Some(id) = scope.container() else {
            return;
        };
        let mut chain = self.ancestors(id).unwrap_or_default();
        chain.push(id);
        for container in chain.into_iter().rev() {
            if let Some(strip) = self.find_mut(container) {
                strip.refresh_bounds();
            }
        }
    }

    // ========== Freeing ==========

    /// Free one strip (and its subtree). Handles are dropped without a
    /// collaborator; see [`free_strip_with`](Self::free_strip_with).
    ///
    /// `cascade` signals cache invalidation for the freed range.
    pub fn free_strip(&mut self, id: StripId, cascade: bool) -> Result<()> {
        self.free_strip_with(id, cascade, &mut Collaborators::none())
    }

    /// Free one strip, returning decode and sound handles to `collab`.
    pub fn free_strip_with(
        &mut self,
        id: StripId,
        cascade: bool,
        collab: &mut Collaborators<'_>,
    ) -> Result<()> {
        let parent = self.parent_scope(id).ok_or(StripError::UnknownStrip(id))?;
        let list = self.list_for_scope_mut(parent)?;
        let pos = list
            .iter()
            .position(|s| s.id() == id)
            .ok_or(StripError::UnknownStrip(id))?;
        let mut detached = list.remove(pos);
        let range = (detached.left_handle(), detached.right_handle());

        let mut freed = Vec::new();
        self.release_tree(&mut detached, collab, true, &mut freed);
        drop(detached);
        debug!("Freed strip {} ({} strips total)", id, freed.len());

        self.forget(&freed);
        self.update_container_bounds(parent);
        if cascade {
            self.invalidate(parent, Some(range));
        }
        self.emitter.emit(StripsFreedEvent { ids: freed });
        Ok(())
    }

    /// Free `ids` plus every effect that uses a freed strip as an operand,
    /// transitively. Returns the number of strips removed, nested included.
    pub fn delete(&mut self, ids: &[StripId]) -> Result<usize> {
        for id in ids {
            if !self.contains(*id) {
                return Err(StripError::UnknownStrip(*id));
            }
        }

        // Freeing a container takes its interior with it
        let mut flagged: HashSet<StripId> = HashSet::new();
        for id in ids {
            if let Some(strip) = self.find(*id) {
                flagged.extend(StripIter::new(std::slice::from_ref(strip)).map(|s| s.id()));
            }
        }
        loop {
            let dependents: Vec<StripId> = self
                .iter()
                .filter(|s| !flagged.contains(&s.id()))
                .filter(|s| s.inputs().iter().flatten().any(|i| flagged.contains(i)))
                .flat_map(|s| StripIter::new(std::slice::from_ref(s)).map(|d| d.id()))
                .collect();
            if dependents.is_empty() {
                break;
            }
            flagged.extend(dependents);
        }

        // Free only the outermost flagged strips
        let roots: Vec<StripId> = self
            .iter()
            .map(|s| s.id())
            .filter(|id| flagged.contains(id))
            .filter(|id| {
                self.ancestors(*id)
                    .is_some_and(|path| !path.iter().any(|a| flagged.contains(a)))
            })
            .collect();
        for id in roots {
            self.free_strip(id, true)?;
        }
        Ok(flagged.len())
    }

    /// Free the whole graph: every strip post-order, the root channel list
    /// and the navigation stack (cleared, not restored).
    ///
    /// `discard_ids` also drops the source user counts; without it they are
    /// left for the owner of those data blocks, which is being torn down too.
    pub fn free(&mut self, discard_ids: bool) {
        self.free_with(discard_ids, &mut Collaborators::none());
    }

    pub fn free_with(&mut self, discard_ids: bool, collab: &mut Collaborators<'_>) {
        let strips = std::mem::take(&mut self.strips);
        let mut freed = Vec::new();
        for mut strip in strips {
            self.release_tree(&mut strip, collab, discard_ids, &mut freed);
        }
        self.channels.clear();
        self.nav.clear();
        self.active_scope = Scope::Root;
        self.active_strip = None;
        if discard_ids {
            self.users.clear();
        }
        debug!("EditingContext::free: released {} strips", freed.len());
        self.invalidate(Scope::Root, None);
        self.emitter.emit(StripsFreedEvent { ids: freed });
    }

    /// Post-order release of a detached subtree.
    fn release_tree(
        &mut self,
        strip: &mut Strip,
        collab: &mut Collaborators<'_>,
        drop_users: bool,
        freed: &mut Vec<StripId>,
    ) {
        if let Some(container) = strip.container.as_mut() {
            let children = std::mem::take(&mut container.strips);
            for mut child in children {
                self.release_tree(&mut child, collab, drop_users, freed);
            }
        }

        let handler = strip.effect().and_then(|name| self.effects.get(name)).cloned();
        if let Some(handler) = handler {
            handler.free(strip);
        }
        if let Some(handle) = strip.payload.take_decode() {
            collab.release_decode(handle);
        }
        if let Some(handle) = strip.sound.take() {
            collab.release_sound(handle);
        }
        if drop_users {
            if let Some(source) = strip.payload.source.clone() {
                self.remove_user(&source);
            }
        }
        self.allocator.release(1);
        freed.push(strip.id());
    }

    /// Drop every remaining reference to freed strips.
    fn forget(&mut self, freed: &[StripId]) {
        let freed: HashSet<StripId> = freed.iter().copied().collect();

        if self.active_strip.is_some_and(|a| freed.contains(&a)) {
            self.active_strip = None;
        }
        self.truncate_nav_for(&freed);

        let mut nulled = 0usize;
        strip::visit_mut(&mut self.strips, &mut |s: &mut Strip| {
            s.connections.retain(|c| !freed.contains(c));
            for input in s.inputs.iter_mut() {
                if input.is_some_and(|i| freed.contains(&i)) {
                    *input = None;
                    nulled += 1;
                }
            }
            for modifier in s.modifiers.iter_mut() {
                if modifier.mask().is_some_and(|m| freed.contains(&m)) {
                    modifier.set_mask(None);
                    nulled += 1;
                }
            }
        });
        if nulled > 0 {
            warn!("Nulled {} operand/mask reference(s) to freed strips", nulled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::collab::testing::{RecordingDecoder, RecordingSound};
    use std::path::PathBuf;

    fn ctx() -> EditingContext {
        EditingContext::new(Config::default())
    }

    #[test]
    fn test_create_assigns_unique_names() {
        let mut ctx = ctx();
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let b = ctx.create(Scope::Root, 30, 1, StripKind::Clip).unwrap();
        assert_ne!(a, b);
        assert_eq!(ctx.find(a).map(|s| s.name()), Some("Clip"));
        assert_eq!(ctx.find(b).map(|s| s.name()), Some("Clip.001"));
        assert_eq!(ctx.find_by_name("Clip.001").map(|s| s.id()), Some(b));
        assert_eq!(ctx.allocator().live(), 2);
    }

    #[test]
    fn test_create_container_gets_channels() {
        let mut ctx = ctx();
        let m = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
        assert_eq!(ctx.scope_channels(Scope::Container(m)).unwrap().len(), 128);
        let clip = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
        assert!(matches!(
            ctx.create(Scope::Container(clip), 0, 1, StripKind::Clip),
            Err(StripError::NotAContainer(_))
        ));
        assert_eq!(ctx.allocator().live(), 2);
    }

    #[test]
    fn test_allocation_limit() {
        let mut ctx = EditingContext::new(Config::default().with_strip_limit(1));
        ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let err = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap_err();
        assert!(matches!(err, StripError::AllocationFailure { requested: 2, limit: 1 }));
        assert_eq!(ctx.strips().len(), 1);
    }

    #[test]
    fn test_effect_operand_validation() {
        let mut ctx = ctx();
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let b = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
        let cross = ctx.create_effect(Scope::Root, 0, 3, "cross", &[a, b]).unwrap();
        assert_eq!(ctx.find(cross).map(|s| s.kind()), Some(StripKind::Transition));
        assert_eq!(ctx.find(cross).map(|s| s.inputs()), Some([Some(a), Some(b)]));

        assert!(matches!(
            ctx.set_inputs(cross, &[a]),
            Err(StripError::OperandCount { expected: 2, got: 1, .. })
        ));
        assert!(matches!(ctx.set_inputs(cross, &[a, cross]), Err(StripError::InvalidReference(_))));
        assert!(matches!(
            ctx.create_effect(Scope::Root, 0, 4, "warp", &[]),
            Err(StripError::UnknownEffect(_))
        ));
        let glow = ctx.create_effect(Scope::Root, 0, 4, "glow", &[b]).unwrap();
        assert_eq!(ctx.find(glow).map(|s| s.kind()), Some(StripKind::Effect));
    }

    #[test]
    fn test_connections_are_symmetric() {
        let mut ctx = ctx();
        let x = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let y = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
        let z = ctx.create(Scope::Root, 0, 3, StripKind::Clip).unwrap();
        ctx.connect(x, y).unwrap();
        ctx.connect(x, z).unwrap();
        ctx.connect(x, y).unwrap();
        assert_eq!(ctx.find(x).unwrap().connections(), [y, z]);
        assert_eq!(ctx.find(y).unwrap().connections(), [x]);

        ctx.disconnect_pair(x, z).unwrap();
        assert!(ctx.find(z).unwrap().connections().is_empty());
        ctx.disconnect(x).unwrap();
        assert!(ctx.find(x).unwrap().connections().is_empty());
        assert!(ctx.find(y).unwrap().connections().is_empty());
    }

    #[test]
    fn test_connect_requires_siblings() {
        let mut ctx = ctx();
        let m = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
        let inner = ctx.create(Scope::Container(m), 0, 1, StripKind::Clip).unwrap();
        let outer = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
        assert!(matches!(ctx.connect(inner, outer), Err(StripError::InvalidReference(_))));
        assert!(matches!(ctx.connect(outer, outer), Err(StripError::InvalidReference(_))));
    }

    #[test]
    fn test_free_clears_active_and_refs() {
        let mut ctx = ctx();
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let b = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
        let fx = ctx.create_effect(Scope::Root, 0, 3, "add", &[a, b]).unwrap();
        let idx = ctx.add_modifier(b, ModifierKind::Mask).unwrap();
        ctx.set_modifier_mask(b, idx, Some(a)).unwrap();
        ctx.connect(a, b).unwrap();
        ctx.set_active_strip(Some(a)).unwrap();

        ctx.free_strip(a, true).unwrap();
        assert!(ctx.active_strip().is_none());
        assert!(!ctx.contains(a));
        assert_eq!(ctx.find(fx).unwrap().inputs(), [None, Some(b)]);
        assert!(ctx.find(b).unwrap().modifiers()[0].mask().is_none());
        assert!(ctx.find(b).unwrap().connections().is_empty());
        assert_eq!(ctx.allocator().live(), 2);
    }

    #[test]
    fn test_free_viewed_container_truncates_navigation() {
        let mut ctx = ctx();
        let outer = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
        let inner = ctx.create(Scope::Container(outer), 0, 1, StripKind::Meta).unwrap();
        ctx.push_container(outer).unwrap();
        ctx.push_container(inner).unwrap();

        ctx.free_strip(inner, false).unwrap();
        assert_eq!(ctx.navigation().depth(), 1);
        assert_eq!(ctx.active_scope(), Scope::Container(outer));
    }

    #[test]
    fn test_delete_takes_dependent_effects() {
        let mut ctx = ctx();
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let b = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
        let glow = ctx.create_effect(Scope::Root, 0, 3, "glow", &[a]).unwrap();
        let blur = ctx.create_effect(Scope::Root, 0, 4, "gaussian_blur", &[glow]).unwrap();
        let keep = ctx.create_effect(Scope::Root, 0, 5, "glow", &[b]).unwrap();

        assert_eq!(ctx.delete(&[a]).unwrap(), 3);
        assert!(!ctx.contains(glow));
        assert!(!ctx.contains(blur));
        assert!(ctx.contains(keep));
        assert_eq!(ctx.allocator().live(), 2);
    }

    #[test]
    fn test_container_bounds_follow_children() {
        let mut ctx = ctx();
        let m = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
        let a = ctx.create(Scope::Container(m), 10, 1, StripKind::Clip).unwrap();
        ctx.create(Scope::Container(m), 100, 2, StripKind::Clip).unwrap();
        let meta = ctx.find(m).unwrap();
        assert_eq!((meta.left_handle(), meta.right_handle()), (10, 125));

        ctx.free_strip(a, false).unwrap();
        let meta = ctx.find(m).unwrap();
        assert_eq!(meta.left_handle(), 100);
    }

    #[test]
    fn test_locked_and_muted_follow_channels() {
        let mut ctx = ctx();
        let a = ctx.create(Scope::Root, 0, 3, StripKind::Clip).unwrap();
        assert!(!ctx.is_strip_locked(a));
        ctx.channels_mut().set_lock(3, true);
        assert!(ctx.is_strip_locked(a));
        assert!(!ctx.is_strip_muted(a));
        ctx.find_mut(a).unwrap().flags.mute = true;
        assert!(ctx.is_strip_muted(a));
    }

    #[test]
    fn test_users_and_collaborators() {
        let mut ctx = ctx();
        let path = PathBuf::from("/media/shot.mp4");
        let clip = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        ctx.set_source(clip, Some(SourceRef::File(path.clone()))).unwrap();
        let snd = ctx.create(Scope::Root, 0, 2, StripKind::Sound).unwrap();
        ctx.set_source(snd, Some(SourceRef::Sound("dialog".into()))).unwrap();
        assert_eq!(ctx.users(&SourceRef::File(path.clone())), 1);

        let mut decoder = RecordingDecoder::default();
        let mut sound = RecordingSound::default();
        assert!(ctx.ensure_decoded(clip, &mut decoder).unwrap());
        assert!(ctx.ensure_decoded(clip, &mut decoder).unwrap());
        assert_eq!(decoder.open.len(), 1);
        ctx.attach_sound(snd, &mut sound).unwrap();
        assert!(ctx.find(snd).unwrap().sound_handle().is_some());

        let mut collab = Collaborators::none().with_decoder(&mut decoder).with_sound(&mut sound);
        ctx.free_strip_with(clip, false, &mut collab).unwrap();
        ctx.free_strip_with(snd, false, &mut collab).unwrap();
        drop(collab);
        assert!(decoder.open.is_empty());
        assert_eq!(decoder.closed, [1]);
        assert!(sound.attached.is_empty());
        assert_eq!(ctx.users(&SourceRef::File(path)), 0);
    }

    #[test]
    fn test_set_source_closes_stale_decode_handle() {
        let mut ctx = ctx();
        let clip = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        ctx.set_source(clip, Some(SourceRef::File("/media/a.mp4".into()))).unwrap();
        let mut decoder = RecordingDecoder::default();
        assert!(ctx.ensure_decoded(clip, &mut decoder).unwrap());

        let next = Some(SourceRef::File("/media/b.mp4".into()));
        let mut collab = Collaborators::none().with_decoder(&mut decoder);
        ctx.set_source_with(clip, next, &mut collab).unwrap();
        drop(collab);
        assert_eq!(decoder.closed, [1]);
        assert!(ctx.find(clip).unwrap().payload.decode_handle().is_none());

        assert!(ctx.ensure_decoded(clip, &mut decoder).unwrap());
        assert_eq!(decoder.open, [2]);
        assert_eq!(ctx.users(&SourceRef::File("/media/a.mp4".into())), 0);
    }

    #[test]
    fn test_rename_to_highest_suffix_keeps_creating() {
        let mut ctx = ctx();
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
        assert_eq!(ctx.rename(a, "Clip.4294967295").unwrap(), "Clip.4294967295");
        let b = ctx.create(Scope::Root, 0, 3, StripKind::Clip).unwrap();
        let c = ctx.create(Scope::Root, 0, 4, StripKind::Clip).unwrap();
        assert_eq!(ctx.find(b).map(|s| s.name()), Some("Clip"));
        // No number above the highest one; the lowest free slot is used
        assert_eq!(ctx.find(c).map(|s| s.name()), Some("Clip.002"));
    }

    #[test]
    fn test_ensure_decoded_reports_decode_errors() {
        let mut ctx = ctx();
        let clip = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        ctx.set_source(clip, Some(SourceRef::File("/media/shot.missing".into()))).unwrap();
        let mut decoder = RecordingDecoder::default();
        assert!(matches!(ctx.ensure_decoded(clip, &mut decoder), Err(StripError::Decode(_))));
        assert!(ctx.find(clip).unwrap().payload.decode_handle().is_none());
    }

    #[test]
    fn test_free_all() {
        let mut ctx = ctx();
        let m = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
        let clip = ctx.create(Scope::Container(m), 0, 1, StripKind::Clip).unwrap();
        ctx.set_source(clip, Some(SourceRef::Scene("Shot".into()))).unwrap();
        ctx.push_container(m).unwrap();

        ctx.free(false);
        assert!(ctx.is_empty());
        assert!(ctx.navigation().is_empty());
        assert_eq!(ctx.active_scope(), Scope::Root);
        assert_eq!(ctx.allocator().live(), 0);
        // Users kept for the data owner
        assert_eq!(ctx.users(&SourceRef::Scene("Shot".into())), 1);
    }

    #[test]
    fn test_rename_disambiguates() {
        let mut ctx = ctx();
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let b = ctx.create(Scope::Root, 0, 2, StripKind::Text).unwrap();
        assert_eq!(ctx.rename(b, "Clip").unwrap(), "Clip.001");
        assert_eq!(ctx.rename(a, "Clip").unwrap(), "Clip");
    }
}
