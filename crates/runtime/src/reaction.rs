//! Reaction lifecycle state
//!
//! One status word per reaction. Program logic moves a reaction from
//! `Inactive` to `Queued` when it becomes eligible at the current tag; the
//! interpreter moves it back when the worker reports completion. Both
//! transitions are single-word atomics, so the table is shared without locks.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::types::{ReactionId, WorkerId};

/// Runtime status of a reaction
///
/// "Running" is implicit: a queued reaction whose handle a worker holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReactionStatus {
    Inactive = 0,
    Queued = 1,
}

impl ReactionStatus {
    fn from_raw(raw: u8) -> Self {
        if raw == ReactionStatus::Queued as u8 {
            ReactionStatus::Queued
        } else {
            ReactionStatus::Inactive
        }
    }
}

/// Status table indexed by [`ReactionId`]
#[derive(Debug)]
pub struct ReactionTable {
    status: Vec<AtomicU8>,
}

impl ReactionTable {
    pub fn new(reaction_count: usize) -> Self {
        Self {
            status: (0..reaction_count)
                .map(|_| AtomicU8::new(ReactionStatus::Inactive as u8))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    fn slot(&self, reaction: ReactionId) -> Result<&AtomicU8> {
        self.status
            .get(reaction.index())
            .ok_or(Error::UnknownReaction(reaction))
    }

    pub fn status(&self, reaction: ReactionId) -> Result<ReactionStatus> {
        Ok(ReactionStatus::from_raw(self.slot(reaction)?.load(Ordering::Acquire)))
    }

    pub fn is_queued(&self, reaction: ReactionId) -> bool {
        matches!(self.status(reaction), Ok(ReactionStatus::Queued))
    }

    /// Mark a reaction eligible at the current tag
    ///
    /// Returns `true` if this call queued it, `false` if it was already queued.
    pub fn trigger(&self, reaction: ReactionId) -> Result<bool> {
        let queued = self
            .slot(reaction)?
            .compare_exchange(
                ReactionStatus::Inactive as u8,
                ReactionStatus::Queued as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if queued {
            trace!(%reaction, "reaction queued");
        } else {
            trace!(%reaction, "reaction already queued");
        }
        Ok(queued)
    }

    /// Retire a reaction after its worker finished running it
    pub fn complete(&self, worker: WorkerId, reaction: ReactionId) -> Result<()> {
        self.slot(reaction)?
            .compare_exchange(
                ReactionStatus::Queued as u8,
                ReactionStatus::Inactive as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|raw| {
                let found = ReactionStatus::from_raw(raw);
                error!(%worker, %reaction, ?found, "completion of a reaction that was not queued");
                Error::LifecycleViolation {
                    worker,
                    reaction,
                    found,
                }
            })
    }

    /// Ids of every currently queued reaction, ascending
    pub fn queued(&self) -> Vec<ReactionId> {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| s.load(Ordering::Acquire) == ReactionStatus::Queued as u8)
            .map(|(idx, _)| ReactionId(idx as u32))
            .collect()
    }

    /// Drop every queued reaction back to inactive
    pub fn clear(&self) {
        for s in &self.status {
            s.store(ReactionStatus::Inactive as u8, Ordering::Release);
        }
    }
}
