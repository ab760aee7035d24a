//! Channel (lane) records of one container scope.
//!
//! # Invariants
//!
//! - Insertion order is display order (last entry drawn last)
//! - At most one record per channel index
//! - Persisted as a plain list of records, not a map

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub mute: bool,
}

impl Channel {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: format!("Channel {}", index),
            lock: false,
            mute: false,
        }
    }
}

/// Ordered channel records keyed by channel index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Channel>", into = "Vec<Channel>")]
pub struct ChannelList {
    channels: IndexMap<u32, Channel>,
}

impl From<Vec<Channel>> for ChannelList {
    fn from(records: Vec<Channel>) -> Self {
        let mut list = ChannelList::new();
        for channel in records {
            list.insert(channel);
        }
        list
    }
}

impl From<ChannelList> for Vec<Channel> {
    fn from(list: ChannelList) -> Self {
        list.channels.into_values().collect()
    }
}

impl ChannelList {
    pub fn new() -> Self {
        Self {
            channels: IndexMap::new(),
        }
    }

    /// Channels `1..=count` with default names.
    pub fn with_count(count: u32) -> Self {
        let mut list = Self::new();
        list.ensure(count);
        list
    }

    /// Make sure channels `1..=count` exist; existing records are untouched.
    pub fn ensure(&mut self, count: u32) {
        for index in 1..=count {
            self.channels.entry(index).or_insert_with(|| Channel::new(index));
        }
    }

    /// Insert or replace a record. Replacing keeps the display position.
    pub fn insert(&mut self, channel: Channel) {
        self.channels.insert(channel.index, channel);
    }

    pub fn get(&self, index: u32) -> Option<&Channel> {
        self.channels.get(&index)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut Channel> {
        self.channels.get_mut(&index)
    }

    pub fn rename(&mut self, index: u32, name: impl Into<String>) -> bool {
        match self.channels.get_mut(&index) {
            Some(channel) => {
                channel.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn set_lock(&mut self, index: u32, lock: bool) -> bool {
        match self.channels.get_mut(&index) {
            Some(channel) => {
                channel.lock = lock;
                true
            }
            None => false,
        }
    }

    pub fn set_mute(&mut self, index: u32, mute: bool) -> bool {
        match self.channels.get_mut(&index) {
            Some(channel) => {
                channel.mute = mute;
                true
            }
            None => false,
        }
    }

    /// Unknown channels are never locked.
    pub fn is_locked(&self, index: u32) -> bool {
        self.get(index).is_some_and(|c| c.lock)
    }

    pub fn is_muted(&self, index: u32) -> bool {
        self.get(index).is_some_and(|c| c.mute)
    }

    /// Records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
