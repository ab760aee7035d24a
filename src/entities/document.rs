//! Timeline document: the persisted shape of an editing context.
//!
//! Strips are written as records keyed by a per-file `file_id`. Operands,
//! masks and connections are stored as file ids, never as live identities.
//! On load every strip gets a fresh [`StripId`] first; the references are
//! then resolved through a [`RemapTable`] exactly like the relink pass of a
//! duplication, and one-sided connections are pruned the same way.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "channels": [{ "index": 1, "name": "Channel 1", "lock": false, "mute": false }],
//!   "strips": [{ "file_id": 0, "name": "Clip", "kind": "clip", "start": 0, ... }],
//!   "active": 0,
//!   "view_path": []
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::attrs::Attrs;
use super::channel::ChannelList;
use super::context::EditingContext;
use super::effect::EffectRegistry;
use super::modifier::{Modifier, ModifierKind};
use super::payload::StripPayload;
use super::remap::{self, PendingRefs, RemapTable};
use super::strip::{self, BlendMode, Container, Strip, StripFlags, StripId, StripKind};
use crate::config::{Config, FORMAT_VERSION};
use crate::error::{Result, StripError};

fn default_alpha() -> f32 {
    1.0
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModifierRecord {
    pub name: String,
    pub kind: ModifierKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: Attrs,
    #[serde(default)]
    pub mask: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerRecord {
    #[serde(default)]
    pub channels: ChannelList,
    #[serde(default)]
    pub strips: Vec<StripRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StripRecord {
    pub file_id: u32,
    pub name: String,
    pub kind: StripKind,
    #[serde(default)]
    pub effect: Option<String>,
    pub start: i32,
    pub channel: u32,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default = "default_alpha")]
    pub blend_alpha: f32,
    #[serde(default)]
    pub flags: StripFlags,
    pub payload: StripPayload,
    #[serde(default)]
    pub inputs: [Option<u32>; 2],
    #[serde(default)]
    pub modifiers: Vec<ModifierRecord>,
    #[serde(default)]
    pub connections: Vec<u32>,
    #[serde(default)]
    pub container: Option<ContainerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimelineDocument {
    pub version: u32,
    #[serde(default)]
    pub channels: ChannelList,
    #[serde(default)]
    pub strips: Vec<StripRecord>,
    /// File id of the active strip
    #[serde(default)]
    pub active: Option<u32>,
    /// File ids of the viewed containers, outermost first
    #[serde(default)]
    pub view_path: Vec<u32>,
}

/// Capture-side state: live id -> file id, plus the written guard.
struct Writer {
    file_ids: HashMap<StripId, u32>,
    written: HashSet<StripId>,
    dropped: usize,
}

impl Writer {
    fn file_id(&mut self, id: StripId) -> Option<u32> {
        let found = self.file_ids.get(&id).copied();
        if found.is_none() {
            self.dropped += 1;
        }
        found
    }

    fn records(&mut self, strips: &[Strip]) -> Vec<StripRecord> {
        let mut out = Vec::with_capacity(strips.len());
        for s in strips {
            // Each strip, and the payload it owns, is written once
            if !self.written.insert(s.id()) {
                warn!("Strip {} reached twice while writing, skipped", s.id());
                continue;
            }
            let Some(file_id) = self.file_ids.get(&s.id()).copied() else {
                continue;
            };
            let inputs = [
                s.inputs()[0].and_then(|i| self.file_id(i)),
                s.inputs()[1].and_then(|i| self.file_id(i)),
            ];
            let modifiers = s
                .modifiers()
                .iter()
                .map(|m| ModifierRecord {
                    name: m.name.clone(),
                    kind: m.kind,
                    enabled: m.enabled,
                    params: m.params.clone(),
                    mask: m.mask().and_then(|id| self.file_id(id)),
                })
                .collect();
            let connections = s.connections().iter().filter_map(|c| self.file_id(*c)).collect();
            let container = s.container().map(|c| ContainerRecord {
                channels: c.channels.clone(),
                strips: self.records(c.strips()),
            });
            out.push(StripRecord {
                file_id,
                name: s.name().to_string(),
                kind: s.kind(),
                effect: s.effect().map(str::to_string),
                start: s.start,
                channel: s.channel,
                blend_mode: s.blend_mode,
                blend_alpha: s.blend_alpha,
                flags: s.flags,
                payload: s.payload.duplicate(),
                inputs,
                modifiers,
                connections,
                container,
            });
        }
        out
    }
}

/// Load-side state: allocation pass output.
struct Reader<'a> {
    ctx: &'a mut EditingContext,
    table: RemapTable<u32>,
    pending: HashMap<StripId, PendingRefs<u32>>,
}

impl Reader<'_> {
    fn build(&mut self, records: Vec<StripRecord>) -> Result<Vec<Strip>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            self.ctx.allocator.allocate()?;
            let id = StripId::new();
            if !self.table.insert(record.file_id, id) {
                return Err(StripError::InvalidReference(format!(
                    "duplicate file id {} in timeline document",
                    record.file_id
                )));
            }
            if let Some(effect) = &record.effect {
                if !self.ctx.effects.contains(effect) {
                    warn!("Strip '{}' uses unregistered effect '{}'", record.name, effect);
                }
            }

            let mut masks = Vec::with_capacity(record.modifiers.len());
            let mut modifiers = Vec::with_capacity(record.modifiers.len());
            for m in record.modifiers {
                masks.push(m.mask);
                let mut modifier = Modifier::new(m.kind);
                modifier.name = m.name;
                modifier.enabled = m.enabled;
                modifier.params = m.params;
                modifiers.push(modifier);
            }
            self.pending.insert(
                id,
                PendingRefs {
                    inputs: record.inputs,
                    masks,
                    connections: record.connections,
                },
            );

            let container = match record.container {
                Some(c) if record.kind.is_container() => Some(Container {
                    strips: self.build(c.strips)?,
                    channels: c.channels,
                }),
                Some(c) => {
                    warn!(
                        "Strip '{}' is a {:?} and cannot hold children, \
                         {} nested record(s) skipped",
                        record.name,
                        record.kind,
                        c.strips.len()
                    );
                    None
                }
                None if record.kind.is_container() => {
                    let channels = ChannelList::with_count(self.ctx.config.channel_count);
                    Some(Container::new(channels))
                }
                None => None,
            };

            let mut strip = Strip::new(
                id,
                record.kind,
                record.start,
                record.channel,
                record.payload,
                None,
            );
            strip.name = record.name;
            strip.effect = record.effect;
            strip.blend_mode = record.blend_mode;
            strip.blend_alpha = record.blend_alpha;
            strip.flags = record.flags;
            strip.modifiers = modifiers;
            strip.container = container;
            out.push(strip);
        }
        Ok(out)
    }
}

/// Drop loaded references that could never have been made through the
/// context: self links, connections to non-siblings, operands of strips
/// without a handler and operand sets the handler does not accept.
/// Returns how many references were dropped.
fn check_refs(list: &mut [Strip], effects: &EffectRegistry) -> usize {
    let siblings: HashSet<StripId> = list.iter().map(|s| s.id()).collect();
    let mut dropped = 0;
    for s in list.iter_mut() {
        let id = s.id();
        let before = s.connections.len();
        s.connections.retain(|c| *c != id && siblings.contains(c));
        dropped += before - s.connections.len();

        for input in s.inputs.iter_mut() {
            if *input == Some(id) {
                *input = None;
                dropped += 1;
            }
        }
        for modifier in s.modifiers.iter_mut() {
            if modifier.mask() == Some(id) {
                modifier.set_mask(None);
                dropped += 1;
            }
        }

        let got = s.inputs.iter().flatten().count();
        if got > 0 {
            let expected = match s.effect() {
                Some(name) => effects.get(name).map(|h| h.operand_count()),
                None => Some(0),
            };
            if let Some(expected) = expected {
                let misplaced = s.inputs.iter().skip(expected).any(Option::is_some);
                if got != expected || misplaced {
                    let err = StripError::InvalidReference(format!(
                        "strip '{}' takes {} operand(s), file gives {}",
                        s.name(),
                        expected,
                        got
                    ));
                    warn!("{}, operands cleared", err);
                    s.inputs = [None, None];
                    dropped += got;
                }
            }
        }

        if let Some(container) = s.container.as_mut() {
            dropped += check_refs(&mut container.strips, effects);
        }
    }
    dropped
}

impl TimelineDocument {
    /// Snapshot a context. File ids follow tree pre-order.
    pub fn capture(ctx: &EditingContext) -> Self {
        let file_ids: HashMap<StripId, u32> = ctx
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i as u32))
            .collect();
        let mut writer = Writer {
            file_ids,
            written: HashSet::new(),
            dropped: 0,
        };
        let strips = writer.records(ctx.strips());
        if writer.dropped > 0 {
            warn!("Dropped {} reference(s) to strips outside the context", writer.dropped);
        }

        let active = ctx.active_strip().and_then(|id| writer.file_ids.get(&id).copied());
        let view_path = ctx
            .navigation()
            .iter()
            .filter_map(|f| writer.file_ids.get(&f.container).copied())
            .collect();
        debug!("Captured {} strips", writer.written.len());

        Self {
            version: FORMAT_VERSION,
            channels: ctx.channels().clone(),
            strips,
            active,
            view_path,
        }
    }

    /// Build a fresh context from this document.
    ///
    /// Identities are regenerated. References that do not resolve are
    /// dropped with a warning; navigation entries that no longer describe a
    /// nesting path are skipped.
    pub fn restore(self, config: Config) -> Result<EditingContext> {
        if self.version == 0 || self.version > FORMAT_VERSION {
            return Err(StripError::UnsupportedVersion {
                found: self.version,
                supported: FORMAT_VERSION,
            });
        }

        let mut ctx = EditingContext::new(config);
        ctx.channels = self.channels;

        let mut reader = Reader {
            ctx: &mut ctx,
            table: RemapTable::new(),
            pending: HashMap::new(),
        };
        let strips = reader.build(self.strips)?;
        let Reader { table, mut pending, .. } = reader;
        ctx.strips = strips;

        // Relink pass
        let mut unresolved = 0;
        strip::visit_mut(&mut ctx.strips, &mut |s: &mut Strip| {
            if let Some(refs) = pending.remove(&s.id()) {
                unresolved += remap::relink(s, refs, &table, &|_: u32| None);
            }
        });
        if unresolved > 0 {
            warn!("Dropped {} unresolved reference(s) while loading", unresolved);
        }
        let invalid = check_refs(&mut ctx.strips, &ctx.effects);
        if invalid > 0 {
            warn!("Dropped {} invalid reference(s) while loading", invalid);
        }
        let pruned = remap::prune_asymmetric(&mut ctx.strips);
        if pruned > 0 {
            warn!("Pruned {} one-sided connection(s) while loading", pruned);
        }

        let sources: Vec<_> = ctx.iter().filter_map(|s| s.payload.source.clone()).collect();
        for source in &sources {
            ctx.add_user(source);
        }

        ctx.active_strip = self.active.and_then(|f| table.get(f));
        for file_id in self.view_path {
            let Some(id) = table.get(file_id) else {
                warn!("View path entry {} does not resolve, navigation stops here", file_id);
                break;
            };
            let expected_parent = ctx.nav.top().map(|f| f.container);
            let parent = ctx.ancestors(id).and_then(|path| path.last().copied());
            if parent != expected_parent {
                warn!(
                    "View path entry {} is not nested in the previous one, navigation stops here",
                    file_id
                );
                break;
            }
            if let Err(e) = ctx.push_frame(id) {
                warn!("View path entry {} skipped: {}", file_id, e);
                break;
            }
        }

        debug!("Restored {} strips", ctx.allocator.live());
        Ok(ctx)
    }

    /// Write pretty JSON; the path is forced to a `.json` extension.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let path = path.as_ref();
        let path = if path.extension().and_then(|s| s.to_str()) != Some("json") {
            path.with_extension("json")
        } else {
            path.to_path_buf()
        };
        fs::write(&path, json)?;
        debug!("Wrote timeline document to {}", path.display());
        Ok(())
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        json.parse()
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromStr for TimelineDocument {
    type Err = StripError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

impl EditingContext {
    /// Capture and write this context as a timeline document.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        TimelineDocument::capture(self).to_json(path)
    }

    /// Read a timeline document into a fresh context.
    pub fn load<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        TimelineDocument::from_json(path)?.restore(config)
    }
}
