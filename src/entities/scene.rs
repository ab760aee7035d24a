//! Scene: owner of an optional, lazily created editing context.

use log::debug;

use super::context::EditingContext;
use crate::config::Config;
use crate::core::event_bus::GraphEmitter;

#[derive(Debug, Default)]
pub struct Scene {
    pub name: String,
    config: Config,
    emitter: GraphEmitter,
    editing: Option<EditingContext>,
}

impl Scene {
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        Self {
            name: name.into(),
            config,
            emitter: GraphEmitter::dummy(),
            editing: None,
        }
    }

    /// Emitter handed to the editing context when it is created.
    pub fn set_emitter(&mut self, emitter: GraphEmitter) {
        if let Some(ctx) = self.editing.as_mut() {
            ctx.set_emitter(emitter.clone());
        }
        self.emitter = emitter;
    }

    /// Editing context of this scene, created with defaults on first use.
    /// Later calls return the same context.
    pub fn ensure_editing(&mut self) -> &mut EditingContext {
        let config = &self.config;
        let emitter = &self.emitter;
        self.editing.get_or_insert_with(|| {
            debug!("Scene: creating editing context");
            let mut ctx = EditingContext::new(config.clone());
            ctx.set_emitter(emitter.clone());
            ctx
        })
    }

    pub fn editing(&self) -> Option<&EditingContext> {
        self.editing.as_ref()
    }

    pub fn editing_mut(&mut self) -> Option<&mut EditingContext> {
        self.editing.as_mut()
    }

    /// Free the editing context and everything in it.
    pub fn free_editing(&mut self, discard_ids: bool) {
        if let Some(mut ctx) = self.editing.take() {
            ctx.free(discard_ids);
            debug!("Scene '{}': editing context freed", self.name);
        }
    }
}
