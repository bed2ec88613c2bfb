//! Tag advancement
//!
//! The logical-time event queue lives outside this crate. The scheduler only
//! needs one operation from it: once every worker is idle, move to the next
//! tag, queue the reactions that tag makes eligible, and say whether the
//! program should stop. That operation is [`TagAdvancer::advance_tag`].

use tracing::debug;

use crate::error::Result;
use crate::reaction::ReactionTable;
use crate::types::{ReactionId, Tag};

/// Leader's verdict after advancing logical time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagDecision {
    /// Reactions for `next` are queued; replay the tapes
    Continue,
    /// The stop condition was reached
    Stop,
}

/// Event-queue collaborator invoked by the tag-advance leader
///
/// Called with the barrier mutex held and every worker parked, so
/// implementations may block but must not call back into the scheduler.
pub trait TagAdvancer: Send {
    /// Queue the reactions of tag `next` in `reactions`, or return `Stop`
    fn advance_tag(&mut self, reactions: &ReactionTable, next: Tag) -> Result<TagDecision>;
}

impl<F> TagAdvancer for F
where
    F: FnMut(&ReactionTable, Tag) -> Result<TagDecision> + Send,
{
    fn advance_tag(&mut self, reactions: &ReactionTable, next: Tag) -> Result<TagDecision> {
        self(reactions, next)
    }
}

/// Replays a fixed list of per-tag trigger sets, then stops
#[derive(Debug, Clone, Default)]
pub struct TagScript {
    tags: Vec<Vec<ReactionId>>,
}

impl TagScript {
    pub fn new(tags: Vec<Vec<ReactionId>>) -> Self {
        Self { tags }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl TagAdvancer for TagScript {
    fn advance_tag(&mut self, reactions: &ReactionTable, next: Tag) -> Result<TagDecision> {
        let Some(triggers) = self.tags.get(next.index as usize) else {
            debug!(%next, "tag script exhausted");
            return Ok(TagDecision::Stop);
        };
        for reaction in triggers {
            reactions.trigger(*reaction)?;
        }
        debug!(%next, triggered = triggers.len(), "scripted tag");
        Ok(TagDecision::Continue)
    }
}

/// Triggers the same reactions at every tag for a fixed number of tags
#[derive(Debug, Clone)]
pub struct Periodic {
    reactions: Vec<ReactionId>,
    tags: u64,
}

impl Periodic {
    pub fn new(reactions: Vec<ReactionId>, tags: u64) -> Self {
        Self { reactions, tags }
    }
}

impl TagAdvancer for Periodic {
    fn advance_tag(&mut self, reactions: &ReactionTable, next: Tag) -> Result<TagDecision> {
        if next.index >= self.tags {
            return Ok(TagDecision::Stop);
        }
        for reaction in &self.reactions {
            reactions.trigger(*reaction)?;
        }
        Ok(TagDecision::Continue)
    }
}
