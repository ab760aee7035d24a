//! Abstract traits for the collaborators a strip talks to.
//!
//! The graph never knows decoder or sound-engine internals. A strip only
//! stores the opaque handle it was given and hands it back on free.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::payload::SourceRef;

/// Opaque decoder resource owned by a clip strip.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DecodeHandle(u64);

impl DecodeHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque sound-engine handle owned by a sound strip.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SoundHandle(u64);

impl SoundHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("media not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported media format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
}

/// Media decode subsystem.
pub trait MediaDecoder {
    fn open(&mut self, path: &Path) -> Result<DecodeHandle, DecodeError>;
    fn close(&mut self, handle: DecodeHandle);
}

/// Sound engine. Strips store the returned handle and nothing else.
pub trait SoundEngine {
    fn attach(&mut self, source: &SourceRef) -> SoundHandle;
    fn detach(&mut self, handle: SoundHandle);
}

/// Collaborators that receive handles back when strips are freed.
///
/// Either side may be absent; handles are then dropped and logged.
#[derive(Default)]
pub struct Collaborators<'a> {
    pub decoder: Option<&'a mut dyn MediaDecoder>,
    pub sound: Option<&'a mut dyn SoundEngine>,
}

impl<'a> Collaborators<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_decoder(mut self, decoder: &'a mut dyn MediaDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_sound(mut self, sound: &'a mut dyn SoundEngine) -> Self {
        self.sound = Some(sound);
        self
    }

    pub(crate) fn release_decode(&mut self, handle: DecodeHandle) {
        match self.decoder.as_deref_mut() {
            Some(decoder) => decoder.close(handle),
            None => log::debug!("Dropping decode handle {} without a decoder", handle.raw()),
        }
    }

    pub(crate) fn release_sound(&mut self, handle: SoundHandle) {
        match self.sound.as_deref_mut() {
            Some(engine) => engine.detach(handle),
            None => log::debug!("Dropping sound handle {} without a sound engine", handle.raw()),
        }
    }
}
