//! Crate-wide defaults and the serde-backed editing configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Channels created for a fresh scope.
pub const DEFAULT_CHANNEL_COUNT: u32 = 128;
/// Length in frames given to newly created strips.
pub const DEFAULT_STRIP_LEN: i32 = 25;
/// Width of the numeric suffix used by name disambiguation ("Clip.001").
pub const NAME_SUFFIX_DIGITS: usize = 3;
/// Timeline document version written by this crate.
pub const FORMAT_VERSION: u32 = 1;
/// Maximum events kept in the deferred event queue before eviction.
pub const MAX_EVENT_QUEUE: usize = 1000;

/// Editing configuration. Missing fields in a config file take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Channels created for the root scope and every new container.
    pub channel_count: u32,
    /// Length given to new strips.
    pub default_strip_len: i32,
    /// Ceiling on live strips; `None` = unbounded.
    pub strip_limit: Option<usize>,
    /// Keep display names unique across the whole context.
    pub unique_names: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            default_strip_len: DEFAULT_STRIP_LEN,
            strip_limit: None,
            unique_names: true,
        }
    }
}

impl Config {
    /// Config with an allocator ceiling.
    pub fn with_strip_limit(mut self, limit: usize) -> Self {
        self.strip_limit = Some(limit);
        self
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&json)?;
        log::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }
}
