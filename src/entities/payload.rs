//! StripPayload: the mutable body of a strip.
//!
//! A payload is uniquely owned by its strip. Duplication value-copies it via
//! [`StripPayload::duplicate`]; the cached decode handle is never carried over,
//! so the original and the copy cannot trample each other's decoder state.
//!
//! # Timing
//!
//! `SourceRange` offsets are relative to the strip's `start`:
//! - left handle = `start + start_offset`
//! - right handle = `start + len - end_offset`
//! - `anim_offset` shifts which source frame plays at the left handle

use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::attrs::Attrs;
use super::collab::DecodeHandle;

/// Source media range of a strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub len: i32,
    pub start_offset: i32,
    pub end_offset: i32,
    pub anim_offset: i32,
}

impl SourceRange {
    pub fn new(len: i32) -> Self {
        Self {
            len: len.max(1),
            start_offset: 0,
            end_offset: 0,
            anim_offset: 0,
        }
    }
}

/// Crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crop {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

/// 2D placement of the strip image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform2D {
    pub offset: [f32; 2],
    pub scale: [f32; 2],
    /// Degrees, counter-clockwise.
    pub rotation: f32,
    /// Normalized pivot (0.5, 0.5 = center).
    pub origin: [f32; 2],
}

impl Default for Transform2D {
    fn default() -> Self {
        Self {
            offset: [0.0, 0.0],
            scale: [1.0, 1.0],
            rotation: 0.0,
            origin: [0.5, 0.5],
        }
    }
}

/// Proxy build settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub enabled: bool,
    /// Proxy sizes in percent of full resolution.
    pub build_sizes: Vec<u32>,
    pub quality: u8,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            build_sizes: vec![25],
            quality: 50,
            directory: None,
        }
    }
}

/// External data a strip draws from. Counted as a "user" by the owning context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "ref", rename_all = "snake_case")]
pub enum SourceRef {
    File(PathBuf),
    Scene(String),
    MovieClip(String),
    Sound(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StripPayload {
    pub range: SourceRange,
    #[serde(default)]
    pub crop: Crop,
    #[serde(default)]
    pub transform: Transform2D,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub source: Option<SourceRef>,
    /// Per-type effect parameters.
    #[serde(default)]
    pub params: Attrs,
    /// Lazily opened decoder resource (runtime-only)
    #[serde(skip)]
    decode: Option<DecodeHandle>,
}

impl StripPayload {
    pub fn new(len: i32) -> Self {
        Self {
            range: SourceRange::new(len),
            crop: Crop::default(),
            transform: Transform2D::default(),
            proxy: ProxySettings::default(),
            source: None,
            params: Attrs::new(),
            decode: None,
        }
    }

    /// Value copy for a duplicated strip. The decode handle stays with `self`.
    pub fn duplicate(&self) -> Self {
        Self {
            range: self.range,
            crop: self.crop,
            transform: self.transform,
            proxy: self.proxy.clone(),
            source: self.source.clone(),
            params: self.params.clone(),
            decode: None,
        }
    }

    pub fn decode_handle(&self) -> Option<&DecodeHandle> {
        self.decode.as_ref()
    }

    pub(crate) fn set_decode(&mut self, handle: DecodeHandle) {
        self.decode = Some(handle);
    }

    pub(crate) fn take_decode(&mut self) -> Option<DecodeHandle> {
        self.decode.take()
    }

    /// Hash every persisted value (decode handle excluded).
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.range.hash(state);
        self.crop.hash(state);
        let t = &self.transform;
        t.offset
            .iter()
            .chain(t.scale.iter())
            .chain(std::iter::once(&t.rotation))
            .chain(t.origin.iter())
            .for_each(|f| f.to_bits().hash(state));
        self.proxy.hash(state);
        self.source.hash(state);
        self.params.hash_into(state);
    }
}

impl Hash for ProxySettings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.enabled.hash(state);
        self.build_sizes.hash(state);
        self.quality.hash(state);
        self.directory.hash(state);
    }
}
