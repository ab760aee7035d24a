//! Strip duplication.
//!
//! Two passes over the selection:
//!
//! 1. **Copy** (pre-order, recursing into containers): every source strip is
//!    value-copied with a fresh identity into a scratch list, and
//!    `source id -> copy id` is recorded in one [`RemapTable`] spanning the
//!    whole call. Payloads are duplicated, never shared.
//! 2. **Relink**: every reference in the scratch list is rewritten through
//!    the table. Same-context copies keep references that leave the copied
//!    set pointing at the originals; copies into another context drop them.
//!
//! Then connections that ended up one-sided are pruned, names are
//! disambiguated (same context only) and the scratch list is spliced into
//! the destination. Any failure before the splice releases every slot taken
//! by this call and leaves both contexts untouched.

use std::collections::HashSet;

use log::{debug, warn};

use super::context::{EditingContext, StripAllocator};
use super::effect::EffectRegistry;
use super::graph_events::StripsDuplicatedEvent;
use super::naming;
use super::navigation::Scope;
use super::remap::{self, PendingRefs, RemapTable};
use super::strip::{self, Container, Strip, StripId, StripIter};
use crate::error::{Result, StripError};

/// State of one copy pass.
struct CopyPass<'a> {
    allocator: &'a mut StripAllocator,
    effects: &'a EffectRegistry,
    table: RemapTable<StripId>,
    created: usize,
}

impl CopyPass<'_> {
    fn copy_tree(&mut self, src: &Strip) -> Result<Strip> {
        self.allocator.allocate()?;
        self.created += 1;

        let id = StripId::new();
        self.table.insert(src.id(), id);

        let mut dst = Strip {
            id,
            name: src.name.clone(),
            kind: src.kind,
            effect: src.effect.clone(),
            start: src.start,
            channel: src.channel,
            blend_mode: src.blend_mode,
            blend_alpha: src.blend_alpha,
            flags: src.flags,
            payload: src.payload.duplicate(),
            inputs: src.inputs,
            modifiers: src.modifiers.clone(),
            connections: src.connections.clone(),
            container: None,
            sound: None,
        };
        if let Some(handler) = src.effect().and_then(|name| self.effects.get(name)) {
            handler.copy(&mut dst, src);
        }

        if let Some(container) = src.container() {
            let mut children = Vec::with_capacity(container.strips().len());
            for child in container.strips() {
                children.push(self.copy_tree(child)?);
            }
            dst.container = Some(Container {
                strips: children,
                channels: container.channels.clone(),
            });
        }
        Ok(dst)
    }

    /// Copy every selected root. On failure the slots taken so far are
    /// returned to the allocator.
    fn copy_all(&mut self, strips: &[Strip], selection: &[StripId]) -> Result<Vec<Strip>> {
        let mut scratch = Vec::with_capacity(selection.len());
        for id in selection {
            let Some(src) = strip::find_in(strips, *id) else {
                continue;
            };
            match self.copy_tree(src) {
                Ok(copy) => scratch.push(copy),
                Err(e) => {
                    warn!(
                        "Duplication aborted after {} strip(s), rolling back: {}",
                        self.created, e
                    );
                    self.allocator.release(self.created);
                    return Err(e);
                }
            }
        }
        Ok(scratch)
    }
}

/// Selected ids that exist, without duplicates and without strips whose
/// ancestor is also selected, in tree pre-order.
fn normalize_selection(strips: &[Strip], ids: &[StripId]) -> Result<Vec<StripId>> {
    let mut wanted: HashSet<StripId> = HashSet::with_capacity(ids.len());
    for id in ids {
        if strip::find_in(strips, *id).is_none() {
            return Err(StripError::UnknownStrip(*id));
        }
        wanted.insert(*id);
    }
    Ok(StripIter::new(strips)
        .map(|s| s.id())
        .filter(|id| wanted.contains(id))
        .filter(|id| {
            strip::path_to(strips, *id).is_some_and(|path| !path.iter().any(|a| wanted.contains(a)))
        })
        .collect())
}

/// Relink pass plus asymmetric-connection pruning over a scratch list.
fn relink_scratch<F>(scratch: &mut [Strip], table: &RemapTable<StripId>, fallback: &F)
where
    F: Fn(StripId) -> Option<StripId>,
{
    let mut unresolved = 0;
    strip::visit_mut(scratch, &mut |s: &mut Strip| {
        let refs = PendingRefs::take_from(s);
        unresolved += remap::relink(s, refs, table, fallback);
    });
    if unresolved > 0 {
        warn!("Dropped {} reference(s) leaving the copied set", unresolved);
    }
    let pruned = remap::prune_asymmetric(scratch);
    if pruned > 0 {
        debug!("Pruned {} one-sided connection(s) from copies", pruned);
    }
}

impl EditingContext {
    /// Duplicate `ids` into the active scope. Returns the ids of the
    /// top-level copies, in tree order.
    pub fn duplicate(&mut self, ids: &[StripId]) -> Result<Vec<StripId>> {
        let dest = self.active_scope;
        self.duplicate_to(ids, dest)
    }

    /// Duplicate `ids` (possibly spanning several containers) into `dest`.
    ///
    /// Selecting a container copies its whole interior. References to strips
    /// outside the selection keep pointing at the originals, except
    /// connections, which only survive when both ends were copied.
    pub fn duplicate_to(&mut self, ids: &[StripId], dest: Scope) -> Result<Vec<StripId>> {
        let selection = normalize_selection(&self.strips, ids)?;
        self.scope_strips(dest)?;

        let mut pass = CopyPass {
            allocator: &mut self.allocator,
            effects: &self.effects,
            table: RemapTable::new(),
            created: 0,
        };
        let mut scratch = pass.copy_all(&self.strips, &selection)?;
        let (table, created) = (pass.table, pass.created);

        relink_scratch(&mut scratch, &table, &|old: StripId| Some(old));

        if self.config.unique_names {
            let mut taken = self.taken_names(None);
            strip::visit_mut(&mut scratch, &mut |s: &mut Strip| {
                s.name = naming::unique_name(&s.name, &taken);
                taken.insert(s.name.clone());
            });
        }

        let copies = self.splice(scratch, dest, &table, created)?;
        if let Some(copy) = self.active_strip.and_then(|a| table.get(a)) {
            self.active_strip = Some(copy);
        }
        debug!("Duplicated {} strip(s) into {:?}", table.len(), dest);
        Ok(copies)
    }

    /// Duplicate `ids` from this context into another one.
    ///
    /// References that leave the copied set are dropped, since the originals
    /// live in a different graph. Display names are kept as they are.
    pub fn duplicate_into(
        &self,
        ids: &[StripId],
        dst: &mut EditingContext,
        dest: Scope,
    ) -> Result<Vec<StripId>> {
        let selection = normalize_selection(&self.strips, ids)?;
        dst.scope_strips(dest)?;

        let mut pass = CopyPass {
            allocator: &mut dst.allocator,
            effects: &dst.effects,
            table: RemapTable::new(),
            created: 0,
        };
        let mut scratch = pass.copy_all(&self.strips, &selection)?;
        let (table, created) = (pass.table, pass.created);

        relink_scratch(&mut scratch, &table, &|_: StripId| None);

        let copies = dst.splice(scratch, dest, &table, created)?;
        debug!("Duplicated {} strip(s) into another context", table.len());
        Ok(copies)
    }

    /// Move finished copies into `dest` and announce them.
    fn splice(
        &mut self,
        scratch: Vec<Strip>,
        dest: Scope,
        table: &RemapTable<StripId>,
        created: usize,
    ) -> Result<Vec<StripId>> {
        let copies: Vec<StripId> = scratch.iter().map(|s| s.id()).collect();
        let sources: Vec<_> = StripIter::new(&scratch)
            .filter_map(|s| s.payload.source.clone())
            .collect();
        let range = scratch
            .iter()
            .map(|s| (s.left_handle(), s.right_handle()))
            .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)));

        match self.list_for_scope_mut(dest) {
            Ok(list) => list.extend(scratch),
            Err(e) => {
                self.allocator.release(created);
                return Err(e);
            }
        }
        for source in &sources {
            self.add_user(source);
        }

        self.update_container_bounds(dest);
        self.invalidate(dest, range);
        let (sources, copied): (Vec<StripId>, Vec<StripId>) = table.iter().unzip();
        self.emitter.emit(StripsDuplicatedEvent { sources, copies: copied });
        Ok(copies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::entities::modifier::ModifierKind;
    use crate::entities::payload::SourceRef;
    use crate::entities::strip::StripKind;

    #[test]
    fn test_duplicate_gets_new_ids_and_names() {
        let mut ctx = EditingContext::new(Config::default());
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let copies = ctx.duplicate(&[a]).unwrap();
        assert_eq!(copies.len(), 1);
        assert_ne!(copies[0], a);
        assert_eq!(ctx.find(copies[0]).map(|s| s.name()), Some("Clip.001"));
        assert_eq!(ctx.strips().len(), 2);
    }

    #[test]
    fn test_selection_inside_selected_container_copied_once() {
        let mut ctx = EditingContext::new(Config::default());
        let m = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
        let a = ctx.create(Scope::Container(m), 0, 1, StripKind::Clip).unwrap();
        let copies = ctx.duplicate(&[a, m, a]).unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(ctx.find(copies[0]).unwrap().children().len(), 1);
        assert_eq!(ctx.len(), 4);
    }

    #[test]
    fn test_outside_operand_kept_within_context() {
        let mut ctx = EditingContext::new(Config::default());
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let glow = ctx.create_effect(Scope::Root, 0, 2, "glow", &[a]).unwrap();
        let idx = ctx.add_modifier(glow, ModifierKind::Mask).unwrap();
        ctx.set_modifier_mask(glow, idx, Some(a)).unwrap();

        let copy = ctx.duplicate(&[glow]).unwrap()[0];
        let copied = ctx.find(copy).unwrap();
        assert_eq!(copied.inputs(), [Some(a), None]);
        assert_eq!(copied.modifiers()[0].mask(), Some(a));
    }

    #[test]
    fn test_cross_context_drops_outside_refs_and_keeps_names() {
        let mut src = EditingContext::new(Config::default());
        let a = src.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        let glow = src.create_effect(Scope::Root, 0, 2, "glow", &[a]).unwrap();

        let mut dst = EditingContext::new(Config::default());
        dst.create(Scope::Root, 0, 1, StripKind::Effect).unwrap();
        let copy = src.duplicate_into(&[glow], &mut dst, Scope::Root).unwrap()[0];

        let copied = dst.find(copy).unwrap();
        assert_eq!(copied.inputs(), [None, None]);
        assert_eq!(copied.name(), "Effect");
        assert_eq!(src.len(), 2);
        assert_eq!(dst.allocator().live(), 2);
    }

    #[test]
    fn test_active_strip_follows_copy() {
        let mut ctx = EditingContext::new(Config::default());
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
        ctx.set_active_strip(Some(a)).unwrap();
        let copy = ctx.duplicate(&[a]).unwrap()[0];
        assert_eq!(ctx.active_strip(), Some(copy));
    }

    #[test]
    fn test_duplicate_adds_users() {
        let mut ctx = EditingContext::new(Config::default());
        let a = ctx.create(Scope::Root, 0, 1, StripKind::Scene).unwrap();
        let source = SourceRef::Scene("Shot 10".into());
        ctx.set_source(a, Some(source.clone())).unwrap();
        ctx.duplicate(&[a]).unwrap();
        assert_eq!(ctx.users(&source), 2);
    }

    #[test]
    fn test_rollback_on_allocation_failure() {
        let mut ctx = EditingContext::new(Config::default().with_strip_limit(4));
        let m = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
        ctx.create(Scope::Container(m), 0, 1, StripKind::Clip).unwrap();
        ctx.create(Scope::Container(m), 0, 2, StripKind::Clip).unwrap();
        let before = ctx.generation();

        let err = ctx.duplicate(&[m]).unwrap_err();
        assert!(matches!(err, StripError::AllocationFailure { .. }));
        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.allocator().live(), 3);
        assert_eq!(ctx.generation(), before);
    }

    #[test]
    fn test_unknown_selection_rejected() {
        let mut ctx = EditingContext::new(Config::default());
        let ghost = StripId::new();
        assert!(matches!(ctx.duplicate(&[ghost]), Err(StripError::UnknownStrip(_))));
    }
}
