//! Effect handlers: per-type behavior of effect-like strips.
//!
//! Effect, transition, text and adjustment strips name a handler. The handler
//! decides how many operand strips the effect consumes, seeds default
//! parameters, and gets a hook on copy and free.
//!
//! # Built-in Handlers
//!
//! | Name | Operands | Transition |
//! |------|----------|------------|
//! | `cross`, `gamma_cross`, `wipe` | 2 | yes |
//! | `add`, `subtract`, `multiply`, `alpha_over`, `alpha_under`, `color_mix` | 2 | no |
//! | `glow`, `transform`, `speed`, `gaussian_blur` | 1 | no |
//! | `color`, `text`, `adjustment`, `multicam` | 0 | no |
//!
//! # Adding New Effects
//!
//! Implement [`EffectHandler`] and register it on an [`EffectRegistry`] passed
//! to `EditingContext::with_registry`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use super::attrs::{AttrValue, Attrs};
use super::payload::StripPayload;
use super::strip::Strip;
use crate::error::{Result, StripError};

/// Capability set of one effect type.
pub trait EffectHandler: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Operand strips consumed (0, 1 or 2).
    fn operand_count(&self) -> usize;

    /// Transitions blend from the first operand to the second.
    fn is_transition(&self) -> bool {
        false
    }

    /// Seed default parameters on a fresh payload.
    fn init(&self, _payload: &mut StripPayload) {}

    /// Called after `dst` was value-copied from `src` (payload included).
    fn copy(&self, _dst: &mut Strip, _src: &Strip) {}

    /// Called once when the strip is freed.
    fn free(&self, _strip: &mut Strip) {}
}

/// Table-driven handler for the built-in effect types.
#[derive(Debug, Clone, Copy)]
struct BuiltinEffect {
    name: &'static str,
    operands: usize,
    transition: bool,
    defaults: fn(&mut Attrs),
}

impl EffectHandler for BuiltinEffect {
    fn name(&self) -> &'static str {
        self.name
    }

    fn operand_count(&self) -> usize {
        self.operands
    }

    fn is_transition(&self) -> bool {
        self.transition
    }

    fn init(&self, payload: &mut StripPayload) {
        (self.defaults)(&mut payload.params);
    }
}

/// Text strips keep a per-copy layout cache key that must not be shared.
#[derive(Debug)]
struct TextEffect;

impl EffectHandler for TextEffect {
    fn name(&self) -> &'static str {
        "text"
    }

    fn operand_count(&self) -> usize {
        0
    }

    fn init(&self, payload: &mut StripPayload) {
        let params = &mut payload.params;
        params.set("text", AttrValue::Str("Text".to_string()));
        params.set("size", AttrValue::Float(60.0));
        params.set("color", AttrValue::Color([1.0, 1.0, 1.0, 1.0]));
        params.set("location", AttrValue::Vec2([0.5, 0.5]));
    }

    fn copy(&self, dst: &mut Strip, _src: &Strip) {
        dst.payload.params.remove("layout_cache");
    }

    fn free(&self, strip: &mut Strip) {
        if strip.payload.params.remove("layout_cache").is_some() {
            log::trace!("Released text layout cache of {}", strip.name());
        }
    }
}

fn no_defaults(_: &mut Attrs) {}

fn factor_default(params: &mut Attrs) {
    params.set("factor", AttrValue::Float(1.0));
}

fn wipe_defaults(params: &mut Attrs) {
    params.set("angle", AttrValue::Float(0.0));
    params.set("blur_width", AttrValue::Float(0.0));
    params.set("direction", AttrValue::Str("out".to_string()));
}

fn glow_defaults(params: &mut Attrs) {
    params.set("threshold", AttrValue::Float(0.5));
    params.set("clamp", AttrValue::Float(1.0));
    params.set("boost", AttrValue::Float(0.5));
}

fn transform_defaults(params: &mut Attrs) {
    params.set("translate", AttrValue::Vec2([0.0, 0.0]));
    params.set("scale", AttrValue::Vec2([1.0, 1.0]));
    params.set("rotation", AttrValue::Float(0.0));
}

fn speed_defaults(params: &mut Attrs) {
    params.set("multiplier", AttrValue::Float(1.0));
}

fn blur_defaults(params: &mut Attrs) {
    params.set("size", AttrValue::Vec2([9.0, 9.0]));
}

fn color_defaults(params: &mut Attrs) {
    params.set("color", AttrValue::Color([0.0, 0.0, 0.0, 1.0]));
}

fn color_mix_defaults(params: &mut Attrs) {
    params.set("blend", AttrValue::Str("overlay".to_string()));
    params.set("factor", AttrValue::Float(1.0));
}

fn multicam_defaults(params: &mut Attrs) {
    params.set("source_channel", AttrValue::Int(0));
}

const fn builtin_effect(
    name: &'static str,
    operands: usize,
    transition: bool,
    defaults: fn(&mut Attrs),
) -> BuiltinEffect {
    BuiltinEffect {
        name,
        operands,
        transition,
        defaults,
    }
}

const BUILTINS: &[BuiltinEffect] = &[
    builtin_effect("cross", 2, true, no_defaults),
    builtin_effect("gamma_cross", 2, true, no_defaults),
    builtin_effect("wipe", 2, true, wipe_defaults),
    builtin_effect("add", 2, false, factor_default),
    builtin_effect("subtract", 2, false, factor_default),
    builtin_effect("multiply", 2, false, factor_default),
    builtin_effect("alpha_over", 2, false, factor_default),
    builtin_effect("alpha_under", 2, false, factor_default),
    builtin_effect("color_mix", 2, false, color_mix_defaults),
    builtin_effect("glow", 1, false, glow_defaults),
    builtin_effect("transform", 1, false, transform_defaults),
    builtin_effect("speed", 1, false, speed_defaults),
    builtin_effect("gaussian_blur", 1, false, blur_defaults),
    builtin_effect("color", 0, false, color_defaults),
    builtin_effect("adjustment", 0, false, no_defaults),
    builtin_effect("multicam", 0, false, multicam_defaults),
];

static BUILTIN_REGISTRY: LazyLock<Arc<EffectRegistry>> = LazyLock::new(|| {
    let mut registry = EffectRegistry::new();
    for builtin in BUILTINS {
        registry.register(Arc::new(*builtin));
    }
    registry.register(Arc::new(TextEffect));
    Arc::new(registry)
});

/// Name -> handler lookup table.
#[derive(Debug, Default, Clone)]
pub struct EffectRegistry {
    handlers: HashMap<String, Arc<dyn EffectHandler>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Shared registry with all built-in handlers.
    pub fn builtin() -> Arc<EffectRegistry> {
        Arc::clone(&BUILTIN_REGISTRY)
    }

    /// Built-ins plus room for custom handlers.
    pub fn extended() -> Self {
        (*Self::builtin()).clone()
    }

    /// Register (or replace) a handler under its own name.
    pub fn register(&mut self, handler: Arc<dyn EffectHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn EffectHandler>> {
        self.handlers.get(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn EffectHandler>> {
        self.get(name).ok_or_else(|| StripError::UnknownEffect(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
