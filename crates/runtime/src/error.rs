//! Runtime errors
//!
//! Every variant is fatal: the static tapes and the dynamic triggering have
//! diverged, or the schedule table itself is corrupt. Nothing here is retried.

use thiserror::Error;

use crate::reaction::ReactionStatus;
use crate::types::{ReactionId, WorkerId};

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("lifecycle violation on {worker}: {reaction} completed while {found:?}")]
    LifecycleViolation {
        worker: WorkerId,
        reaction: ReactionId,
        found: ReactionStatus,
    },

    #[error("reaction not found: {0}")]
    UnknownReaction(ReactionId),

    #[error("worker {worker} out of range (scheduler has {workers} workers)")]
    InvalidWorker { worker: WorkerId, workers: usize },

    #[error("malformed tape: variant {variant}, {worker}, pc {pc}: {message}")]
    MalformedTape {
        variant: usize,
        worker: WorkerId,
        pc: usize,
        message: String,
    },

    #[error("invalid schedule table: {0}")]
    InvalidTable(String),

    #[error("bundle error: {0}")]
    Bundle(String),

    #[error("scheduler poisoned by an earlier fatal error")]
    Poisoned,

    #[error("reaction {reaction} failed: {message}")]
    ReactionFailed { reaction: ReactionId, message: String },

    #[error("failed to spawn {worker}: {message}")]
    Spawn { worker: WorkerId, message: String },

    #[error("worker {0} panicked")]
    WorkerPanicked(WorkerId),
}
