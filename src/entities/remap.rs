//! Relink machinery shared by duplication and document load.
//!
//! Both problems have the same shape: a batch of strips was just built with
//! fresh identities, and their cross-references still speak the *source*
//! vocabulary (original `StripId`s for a copy, per-file `u32` ids for a load).
//! A [`RemapTable`] filled during construction translates them in one pass.
//!
//! The table is created by the caller and threaded through the whole
//! operation. It is never global, so nested containers copied together share
//! one mapping and concurrent operations cannot observe each other.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use super::strip::{self, Strip, StripId};

/// Source key -> new identity, for one operation.
#[derive(Debug, Clone)]
pub struct RemapTable<K> {
    map: HashMap<K, StripId>,
}

impl<K: Copy + Eq + Hash> Default for RemapTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> RemapTable<K> {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Record a mapping. Returns false if `source` was already mapped
    /// (the earlier mapping is kept).
    pub fn insert(&mut self, source: K, target: StripId) -> bool {
        if self.map.contains_key(&source) {
            return false;
        }
        self.map.insert(source, target);
        true
    }

    pub fn get(&self, source: K) -> Option<StripId> {
        self.map.get(&source).copied()
    }

    pub fn contains(&self, source: K) -> bool {
        self.map.contains_key(&source)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, StripId)> + '_ {
        self.map.iter().map(|(k, v)| (*k, *v))
    }
}

/// Cross-references of one freshly built strip, still in source keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRefs<K> {
    pub inputs: [Option<K>; 2],
    /// One slot per modifier, in modifier order
    pub masks: Vec<Option<K>>,
    pub connections: Vec<K>,
}

impl PendingRefs<StripId> {
    /// Move the references of a value-copied strip out into pending form.
    /// The strip is left with no references until relinked.
    pub(crate) fn take_from(strip: &mut Strip) -> Self {
        Self {
            inputs: std::mem::take(&mut strip.inputs),
            masks: strip.modifiers.iter_mut().map(|m| m.take_mask()).collect(),
            connections: std::mem::take(&mut strip.connections),
        }
    }
}

/// Rewrite the references of `strip` through `table`.
///
/// Keys missing from the table go through `fallback`; a `None` from it
/// leaves the slot empty (connections are dropped). Returns how many
/// references could not be resolved.
pub(crate) fn relink<K, F>(
    strip: &mut Strip,
    refs: PendingRefs<K>,
    table: &RemapTable<K>,
    fallback: &F,
) -> usize
where
    K: Copy + Eq + Hash,
    F: Fn(K) -> Option<StripId>,
{
    let mut unresolved = 0;
    let mut resolve = |key: K| {
        let found = table.get(key).or_else(|| fallback(key));
        if found.is_none() {
            unresolved += 1;
        }
        found
    };

    let inputs = [
        refs.inputs[0].and_then(&mut resolve),
        refs.inputs[1].and_then(&mut resolve),
    ];
    strip.inputs = inputs;

    for (modifier, mask) in strip.modifiers.iter_mut().zip(refs.masks) {
        modifier.set_mask(mask.and_then(&mut resolve));
    }

    let mut seen = HashSet::new();
    strip.connections = refs
        .connections
        .into_iter()
        .filter_map(&mut resolve)
        .filter(|c| seen.insert(*c))
        .collect();
    unresolved
}

/// Drop every connection inside `batch` whose partner does not point back,
/// and every connection of a strip to itself.
///
/// Only strips inside the batch can point back at a batch strip (their ids
/// are brand new), so any connection leaving the batch is one-sided.
/// Returns the number of connection halves removed.
pub(crate) fn prune_asymmetric(batch: &mut [Strip]) -> usize {
    let mut links: HashSet<(StripId, StripId)> = HashSet::new();
    for s in strip::StripIter::new(batch) {
        for c in s.connections() {
            links.insert((s.id(), *c));
        }
    }

    let mut removed = 0;
    strip::visit_mut(batch, &mut |s: &mut Strip| {
        let id = s.id();
        let before = s.connections.len();
        s.connections.retain(|c| *c != id && links.contains(&(*c, id)));
        removed += before - s.connections.len();
    });
    removed
}
