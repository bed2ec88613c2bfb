//! Synthesis errors
//!
//! Every variant is fatal at compile time: no schedule table is produced.

use thiserror::Error;

use cadence_runtime::ReactionId;

/// Synthesis result type
pub type Result<T> = std::result::Result<T, SynthesisError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("precedence graph has no reactions")]
    EmptyGraph,

    #[error("dependency cycle: {}", format_path(path))]
    Cycle { path: Vec<ReactionId> },

    #[error("{workers} workers requested but only {reactions} reactions can occupy them")]
    TooManyWorkers { workers: usize, reactions: usize },

    #[error("no assignment satisfies the constraint model: {0}")]
    Infeasible(String),

    #[error("edge refers to unknown reaction {0}")]
    UnknownReaction(ReactionId),

    #[error("reaction {0} depends on itself")]
    SelfEdge(ReactionId),

    #[error("reaction {0} declared twice")]
    DuplicateReaction(ReactionId),

    #[error("invalid tag shape '{name}': {message}")]
    InvalidShape { name: String, message: String },

    #[error("internal synthesis error: {0}")]
    Internal(String),
}

fn format_path(path: &[ReactionId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
