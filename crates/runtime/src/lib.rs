//! Cadence Runtime
//!
//! Interprets quasi-static schedules: per-worker instruction tapes synthesized
//! offline, replayed at every logical tag with a quiescence barrier between
//! tags.
//!
//! A run wires four pieces together:
//! - a [`ScheduleTable`] (loaded from a bundle or static arrays)
//! - a [`TagAdvancer`] that queues each tag's reactions
//! - a [`QsScheduler`] shared by every worker thread
//! - a [`Program`] holding the reaction bodies, driven by [`run`]

pub mod advance;
pub mod barrier;
pub mod bundle;
pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod instruction;
pub mod reaction;
pub mod schedule;
pub mod scheduler;
pub mod types;

pub use advance::{Periodic, TagAdvancer, TagDecision, TagScript};
pub use bundle::ScheduleBundle;
pub use config::{RunOptions, SchedulerConfig};
pub use error::{Error, Result};
pub use executor::{Program, ReactionContext, ReactionFn, RunReport, run};
pub use instruction::{Instruction, InstructionRecord};
pub use reaction::{ReactionStatus, ReactionTable};
pub use schedule::{CompiledTable, ScheduleTable, ScheduleVariant, StaticVariant, Tape};
pub use scheduler::{QsScheduler, SchedulerStats};
pub use types::*;
