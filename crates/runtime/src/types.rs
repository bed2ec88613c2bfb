//! Core runtime types
//!
//! Dense integer identifiers shared by the synthesizer and the interpreter.
//! Ids index directly into the runtime arenas and are never reused within
//! one compiled program.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionId(pub u32);

impl ReactionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ReactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl From<u32> for ReactionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Unique identifier for a synchronisation channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Index of a worker thread in `[0, W)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl WorkerId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

impl From<usize> for WorkerId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}

/// A logical instant
///
/// Tags are numbered from 0 in the order the leader advances them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Tag {
    pub index: u64,
}

impl Tag {
    pub fn next(self) -> Self {
        Self {
            index: self.index + 1,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.index)
    }
}
