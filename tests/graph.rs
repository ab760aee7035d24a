//! Cross-module properties of the strip graph: duplication isomorphism,
//! connection symmetry, navigation discipline, failure atomicity and
//! document round trips.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use stripgraph::entities::{ModifierKind, SourceRef};
use stripgraph::{
    CacheInvalidatedEvent, Config, EditingContext, EventBus, GraphEmitter, Scope, Strip, StripError,
    StripId, StripKind, StripsDuplicatedEvent, StripsFreedEvent, TimelineDocument, downcast_event,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Every connection has its back-reference.
fn assert_connections_symmetric(ctx: &EditingContext) {
    for s in ctx.iter() {
        for partner in s.connections() {
            let p = ctx
                .find(*partner)
                .unwrap_or_else(|| panic!("{} connects to missing {}", s.name(), partner));
            assert!(p.connections().contains(&s.id()), "{} -> {} is one-sided", s.name(), p.name());
        }
    }
}

/// Every operand, mask and connection resolves inside the context.
fn assert_no_dangling(ctx: &EditingContext) {
    for s in ctx.iter() {
        let refs = s
            .inputs()
            .into_iter()
            .flatten()
            .chain(s.modifiers().iter().filter_map(|m| m.mask()))
            .chain(s.connections().iter().copied());
        for r in refs {
            assert!(ctx.contains(r), "{} references missing strip {}", s.name(), r);
        }
    }
}

/// Ids of a subtree, pre-order.
fn subtree_ids(strip: &Strip) -> Vec<StripId> {
    let mut out = vec![strip.id()];
    for child in strip.children() {
        out.extend(subtree_ids(child));
    }
    out
}

/// Reference topology of a subtree, expressed as pre-order positions.
fn topology(strip: &Strip) -> Vec<(usize, Vec<Option<usize>>)> {
    let ids = subtree_ids(strip);
    let pos = |id: StripId| ids.iter().position(|x| *x == id);
    let mut out = Vec::new();
    fn walk(
        s: &Strip,
        pos: &dyn Fn(StripId) -> Option<usize>,
        out: &mut Vec<(usize, Vec<Option<usize>>)>,
    ) {
        let mut refs: Vec<Option<usize>> = s.inputs().iter().map(|i| i.and_then(pos)).collect();
        refs.extend(s.modifiers().iter().map(|m| m.mask().and_then(pos)));
        refs.extend(s.connections().iter().map(|c| pos(*c)));
        out.push((pos(s.id()).unwrap_or(usize::MAX), refs));
        for child in s.children() {
            walk(child, pos, out);
        }
    }
    walk(strip, &pos, &mut out);
    out
}

/// M { A, E(A, A) } on the root.
fn build_meta(ctx: &mut EditingContext) -> (StripId, StripId, StripId) {
    let m = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
    let a = ctx.create(Scope::Container(m), 0, 1, StripKind::Clip).unwrap();
    if let Some(strip) = ctx.find_mut(a) {
        strip.payload.range.len = 50;
    }
    let e = ctx.create_effect(Scope::Container(m), 0, 2, "cross", &[a, a]).unwrap();
    (m, a, e)
}

#[test]
fn duplicate_meta_relinks_self_referential_effect() {
    init_logs();
    let mut ctx = EditingContext::new(Config::default());
    let (m, a, e) = build_meta(&mut ctx);

    let copies = ctx.duplicate(&[m]).unwrap();
    assert_eq!(copies.len(), 1);
    let m2 = ctx.find(copies[0]).unwrap();
    assert!(m2.is_container());
    assert_eq!(m2.children().len(), 2);

    let a2 = &m2.children()[0];
    let e2 = &m2.children()[1];
    assert_ne!(a2.id(), a);
    assert_ne!(e2.id(), e);
    assert_eq!(e2.inputs(), [Some(a2.id()), Some(a2.id())]);

    // Original untouched
    assert_eq!(ctx.find(e).unwrap().inputs(), [Some(a), Some(a)]);
    assert_no_dangling(&ctx);
}

#[test]
fn duplicate_is_isomorphic_with_fresh_ids() {
    let mut ctx = EditingContext::new(Config::default());
    let (m, a, e) = build_meta(&mut ctx);
    let b = ctx.create(Scope::Container(m), 60, 3, StripKind::Clip).unwrap();
    ctx.connect(a, b).unwrap();
    let idx = ctx.add_modifier(e, ModifierKind::Mask).unwrap();
    ctx.set_modifier_mask(e, idx, Some(b)).unwrap();
    let inner = ctx.create(Scope::Container(m), 0, 4, StripKind::Meta).unwrap();
    let deep = ctx.create(Scope::Container(inner), 5, 1, StripKind::Clip).unwrap();
    ctx.create_effect(Scope::Container(inner), 5, 2, "glow", &[deep]).unwrap();

    let copy = ctx.duplicate(&[m]).unwrap()[0];
    let original = ctx.find(m).unwrap();
    let copied = ctx.find(copy).unwrap();

    assert_eq!(original.content_hash(), copied.content_hash());
    assert_eq!(topology(original), topology(copied));

    let old_ids: HashSet<StripId> = subtree_ids(original).into_iter().collect();
    let new_ids: HashSet<StripId> = subtree_ids(copied).into_iter().collect();
    assert!(old_ids.is_disjoint(&new_ids));

    // Internal references of the copy stay inside the copy
    fn refs_inside(s: &Strip, ids: &HashSet<StripId>) {
        for r in s.inputs().into_iter().flatten().chain(s.connections().iter().copied()) {
            assert!(ids.contains(&r));
        }
        for child in s.children() {
            refs_inside(child, ids);
        }
    }
    refs_inside(copied, &new_ids);
    assert_connections_symmetric(&ctx);
}

#[test]
fn duplicating_one_connected_strip_leaves_no_connection() {
    let mut ctx = EditingContext::new(Config::default());
    let x = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
    let y = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
    ctx.connect(x, y).unwrap();

    let x2 = ctx.duplicate(&[x]).unwrap()[0];
    assert!(ctx.find(x2).unwrap().connections().is_empty());
    assert_eq!(ctx.find(x).unwrap().connections(), [y]);
    assert_eq!(ctx.find(y).unwrap().connections(), [x]);
    assert_connections_symmetric(&ctx);
}

#[test]
fn duplicating_both_connected_strips_reconnects_copies() {
    let mut ctx = EditingContext::new(Config::default());
    let x = ctx.create(Scope::Root, 0, 1, StripKind::Clip).unwrap();
    let y = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
    ctx.connect(x, y).unwrap();

    let copies = ctx.duplicate(&[x, y]).unwrap();
    assert_eq!(ctx.find(copies[0]).unwrap().connections(), [copies[1]]);
    assert_eq!(ctx.find(copies[1]).unwrap().connections(), [copies[0]]);
    assert_connections_symmetric(&ctx);
}

#[test]
fn selection_across_containers_shares_one_mapping() {
    let mut ctx = EditingContext::new(Config::default());
    let m1 = ctx.create(Scope::Root, 0, 1, StripKind::Meta).unwrap();
    let m2 = ctx.create(Scope::Root, 0, 2, StripKind::Meta).unwrap();
    let a = ctx.create(Scope::Container(m1), 0, 1, StripKind::Clip).unwrap();
    let glow = ctx.create_effect(Scope::Container(m2), 0, 1, "glow", &[a]).unwrap();

    let copies = ctx.duplicate_to(&[m1, m2], Scope::Root).unwrap();
    let a2 = ctx.find(copies[0]).unwrap().children()[0].id();
    let glow2 = &ctx.find(copies[1]).unwrap().children()[0];
    assert_eq!(glow2.inputs(), [Some(a2), None]);
    assert_eq!(ctx.find(glow).unwrap().inputs(), [Some(a), None]);
}

#[test]
fn connections_stay_symmetric_through_free() {
    let mut ctx = EditingContext::new(Config::default());
    let ids: Vec<StripId> = (0..4)
        .map(|i| ctx.create(Scope::Root, 0, i + 1, StripKind::Clip).unwrap())
        .collect();
    ctx.connect(ids[0], ids[1]).unwrap();
    ctx.connect(ids[0], ids[2]).unwrap();
    ctx.connect(ids[2], ids[3]).unwrap();

    ctx.free_strip(ids[2], true).unwrap();
    assert_connections_symmetric(&ctx);
    assert_no_dangling(&ctx);
    assert_eq!(ctx.find(ids[0]).unwrap().connections(), [ids[1]]);
}

#[test]
fn freeing_active_strip_clears_it() {
    let mut ctx = EditingContext::new(Config::default());
    let (m, a, _) = build_meta(&mut ctx);
    ctx.set_active_strip(Some(a)).unwrap();
    ctx.free_strip(m, true).unwrap();
    assert_eq!(ctx.active_strip(), None);
    assert!(ctx.is_empty());
    assert_eq!(ctx.allocator().live(), 0);
}

#[test]
fn navigation_is_lifo() {
    let mut ctx = EditingContext::new(Config::default());
    let mut containers = Vec::new();
    let mut scope = Scope::Root;
    for _ in 0..5 {
        let c = ctx.create(scope, 0, 1, StripKind::Meta).unwrap();
        containers.push(c);
        scope = Scope::Container(c);
    }

    let before = ctx.active_scope();
    for c in &containers {
        ctx.push_container(*c).unwrap();
    }
    let popped: Vec<StripId> = (0..containers.len())
        .map(|_| ctx.pop_container().unwrap())
        .collect();
    let expected: Vec<StripId> = containers.iter().rev().copied().collect();
    assert_eq!(popped, expected);
    assert_eq!(ctx.active_scope(), before);
    assert!(matches!(ctx.pop_container(), Err(StripError::StackUnderflow)));
}

#[test]
fn allocation_failure_mid_copy_changes_nothing() {
    init_logs();
    // Five strips exist; the limit lets k of the five copies succeed.
    for k in 0..5 {
        let mut ctx = EditingContext::new(Config::default().with_strip_limit(5 + k));
        let (m, a, _) = build_meta(&mut ctx);
        let x = ctx.create(Scope::Root, 0, 2, StripKind::Clip).unwrap();
        let y = ctx.create(Scope::Root, 0, 3, StripKind::Clip).unwrap();
        ctx.connect(x, y).unwrap();
        ctx.set_active_strip(Some(a)).unwrap();

        let before = TimelineDocument::capture(&ctx).to_json_string().unwrap();
        let result = ctx.duplicate_to(&[m, x, y], Scope::Root);
        assert!(matches!(result, Err(StripError::AllocationFailure { .. })), "k = {}", k);

        let after = TimelineDocument::capture(&ctx).to_json_string().unwrap();
        assert_eq!(before, after, "graph changed after failure at copy {}", k);
        assert_eq!(ctx.allocator().live(), 5);
        assert_eq!(ctx.active_strip(), Some(a));
    }
}

#[test]
fn document_round_trip_preserves_structure() {
    let mut ctx = EditingContext::new(Config::default());
    let (m, a, e) = build_meta(&mut ctx);
    ctx.set_source(a, Some(SourceRef::File("/media/plate.exr".into()))).unwrap();
    let x = ctx.create(Scope::Root, 100, 2, StripKind::Clip).unwrap();
    let y = ctx.create(Scope::Root, 100, 3, StripKind::Clip).unwrap();
    ctx.connect(x, y).unwrap();
    let idx = ctx.add_modifier(x, ModifierKind::ColorBalance).unwrap();
    ctx.set_modifier_mask(x, idx, Some(e)).unwrap();
    ctx.channels_mut().rename(2, "Dialog");
    ctx.set_active_strip(Some(e)).unwrap();
    ctx.push_container(m).unwrap();

    let path = std::env::temp_dir().join(format!("stripgraph_{}.json", uuid::Uuid::new_v4()));
    ctx.save(&path).unwrap();
    let loaded = EditingContext::load(&path, Config::default()).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded.len(), ctx.len());
    for (old, new) in ctx.strips().iter().zip(loaded.strips()) {
        assert_eq!(old.content_hash(), new.content_hash());
        assert_eq!(topology(old), topology(new));
        assert_ne!(old.id(), new.id());
    }
    let x2 = loaded.find_by_name(ctx.find(x).unwrap().name()).unwrap();
    let e2 = loaded.find_by_name(ctx.find(e).unwrap().name()).unwrap();
    assert_eq!(x2.modifiers()[0].mask(), Some(e2.id()));
    assert_eq!(loaded.channels().get(2).map(|c| c.name.as_str()), Some("Dialog"));
    assert_eq!(loaded.active_strip(), Some(e2.id()));
    assert_eq!(loaded.navigation().depth(), 1);
    assert_eq!(loaded.users(&SourceRef::File("/media/plate.exr".into())), 1);
    assert_connections_symmetric(&loaded);
    assert_no_dangling(&loaded);
}

#[test]
fn events_reach_subscribers() {
    let bus = EventBus::new();
    let freed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&freed);
    bus.subscribe::<StripsFreedEvent, _>(move |e| {
        sink.lock().unwrap().extend(e.ids.iter().copied());
    });

    let mut ctx = EditingContext::new(Config::default());
    ctx.set_emitter(GraphEmitter::from_emitter(bus.emitter()));
    let (m, a, e) = build_meta(&mut ctx);
    ctx.duplicate(&[a]).unwrap();
    bus.poll();

    let generation = ctx.generation();
    ctx.free_strip(m, true).unwrap();
    assert!(ctx.generation() > generation);

    let got: HashSet<StripId> = freed.lock().unwrap().iter().copied().collect();
    assert!(got.contains(&m) && got.contains(&a) && got.contains(&e));
    assert_eq!(got.len(), 3);

    let events = bus.poll();
    assert!(events.iter().any(|ev| downcast_event::<CacheInvalidatedEvent>(ev).is_some()));
    assert!(events.iter().all(|ev| downcast_event::<StripsDuplicatedEvent>(ev).is_none()));
}
