//! Scheduler and run configuration

use serde::{Deserialize, Serialize};

/// Configuration for a [`QsScheduler`](crate::scheduler::QsScheduler)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of workers (0 = take the worker count from the schedule table)
    pub workers: usize,
    /// Variant active before the first tag advance
    pub initial_variant: usize,
    /// Prefix for worker thread names
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            initial_variant: 0,
            thread_name: "cadence-worker".to_string(),
        }
    }
}

/// Options for driving a program with [`run`](crate::executor::run)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Ask the tag advancer for tag 0 before workers start
    ///
    /// Disable when the caller has already queued the first tag's reactions.
    pub advance_initial_tag: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            advance_initial_tag: true,
        }
    }
}
