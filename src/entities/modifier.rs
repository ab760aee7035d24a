//! Strip modifiers: per-strip color/mask processing steps.
//!
//! A modifier may reference a "mask" strip by identity. The reference is
//! non-owning and is rewritten by the relink pass on duplicate and load.
//!
//! # Modifier Types
//!
//! | Type | Parameters |
//! |------|------------|
//! | **ColorBalance** | `lift`, `gamma`, `gain` (Color) |
//! | **Curves** | `black_level`, `white_level` |
//! | **HueCorrect** | `hue_shift` |
//! | **BrightContrast** | `brightness`, `contrast` |
//! | **Mask** | `invert` |
//! | **WhiteBalance** | `white_value` (Color) |
//! | **Tonemap** | `key`, `gamma` |

use serde::{Deserialize, Serialize};

use super::attrs::{AttrValue, Attrs};
use super::strip::StripId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    ColorBalance,
    Curves,
    HueCorrect,
    BrightContrast,
    Mask,
    WhiteBalance,
    Tonemap,
}

impl ModifierKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ModifierKind::ColorBalance => "Color Balance",
            ModifierKind::Curves => "Curves",
            ModifierKind::HueCorrect => "Hue Correct",
            ModifierKind::BrightContrast => "Bright/Contrast",
            ModifierKind::Mask => "Mask",
            ModifierKind::WhiteBalance => "White Balance",
            ModifierKind::Tonemap => "Tonemap",
        }
    }

    pub fn all() -> &'static [ModifierKind] {
        &[
            ModifierKind::ColorBalance,
            ModifierKind::Curves,
            ModifierKind::HueCorrect,
            ModifierKind::BrightContrast,
            ModifierKind::Mask,
            ModifierKind::WhiteBalance,
            ModifierKind::Tonemap,
        ]
    }
}

/// Modifier instance attached to a strip.
///
/// Not serialized directly: the mask is a live identity, persisted through
/// `ModifierRecord` as a file-scoped id.
#[derive(Clone, Debug, PartialEq)]
pub struct Modifier {
    pub name: String,
    pub kind: ModifierKind,
    pub params: Attrs,
    /// Disabled modifiers are skipped by the renderer.
    pub enabled: bool,
    mask: Option<StripId>,
}

impl Modifier {
    /// New modifier with default parameters for `kind`.
    pub fn new(kind: ModifierKind) -> Self {
        let mut params = Attrs::new();
        match kind {
            ModifierKind::ColorBalance => {
                params.set("lift", AttrValue::Color([1.0, 1.0, 1.0, 1.0]));
                params.set("gamma", AttrValue::Color([1.0, 1.0, 1.0, 1.0]));
                params.set("gain", AttrValue::Color([1.0, 1.0, 1.0, 1.0]));
            }
            ModifierKind::Curves => {
                params.set("black_level", AttrValue::Float(0.0));
                params.set("white_level", AttrValue::Float(1.0));
            }
            ModifierKind::HueCorrect => {
                params.set("hue_shift", AttrValue::Float(0.0));
            }
            ModifierKind::BrightContrast => {
                params.set("brightness", AttrValue::Float(0.0));
                params.set("contrast", AttrValue::Float(0.0));
            }
            ModifierKind::Mask => {
                params.set("invert", AttrValue::Bool(false));
            }
            ModifierKind::WhiteBalance => {
                params.set("white_value", AttrValue::Color([1.0, 1.0, 1.0, 1.0]));
            }
            ModifierKind::Tonemap => {
                params.set("key", AttrValue::Float(0.18));
                params.set("gamma", AttrValue::Float(1.0));
            }
        }

        Self {
            name: kind.display_name().to_string(),
            kind,
            params,
            enabled: true,
            mask: None,
        }
    }

    /// Strip used as this modifier's mask, if any.
    pub fn mask(&self) -> Option<StripId> {
        self.mask
    }

    pub(crate) fn set_mask(&mut self, mask: Option<StripId>) {
        self.mask = mask;
    }

    pub(crate) fn take_mask(&mut self) -> Option<StripId> {
        self.mask.take()
    }
}
