//! Quiescence barrier
//!
//! Workers that reach `Stop` arrive here. The arrival that brings the idle
//! count to `W` elects that worker leader for the tag: it runs the tag-advance
//! closure while still holding the barrier mutex, then bumps the generation
//! and wakes everyone else. Non-leaders wait for the generation to change,
//! so a wake-up can never be consumed by a worker that already raced ahead
//! into the next tag.
//!
//! ```text
//!  Running ──(last Stop)──▶ AllIdle ──(Continue)──▶ Advanced ──▶ Running
//!                                  └──(Stop)──────▶ Terminated
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::advance::TagDecision;
use crate::types::WorkerId;

/// What a worker observed when it left the barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// The next tag is ready and program counters are reset
    Advanced { leader: bool },
    /// The stop condition was reached; the worker should exit
    Terminated { leader: bool },
    /// A fatal error elsewhere shut the scheduler down
    Poisoned,
}

impl BarrierOutcome {
    pub fn is_leader(&self) -> bool {
        matches!(
            self,
            BarrierOutcome::Advanced { leader: true } | BarrierOutcome::Terminated { leader: true }
        )
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    /// Workers currently parked at `Stop` for this generation
    idle: usize,
    /// Bumped once per completed tag advance
    generation: u64,
}

/// Election barrier shared by all workers of a scheduler
#[derive(Debug)]
pub struct QuiescenceBarrier {
    workers: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
    terminated: AtomicBool,
    poisoned: AtomicBool,
}

impl QuiescenceBarrier {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
            terminated: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of tag advances completed so far
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn idle_workers(&self) -> usize {
        self.state.lock().idle
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Park at the barrier; the last arrival runs `lead`
    ///
    /// `lead` executes under the barrier mutex, so tag advancement is
    /// serialized and no released worker can observe a half-reset scheduler.
    pub fn arrive<F>(&self, worker: WorkerId, lead: F) -> BarrierOutcome
    where
        F: FnOnce() -> TagDecision,
    {
        let mut state = self.state.lock();
        if self.is_poisoned() {
            return BarrierOutcome::Poisoned;
        }
        if self.is_terminated() {
            return BarrierOutcome::Terminated { leader: false };
        }

        state.idle += 1;
        trace!(%worker, idle = state.idle, workers = self.workers, "worker idle");

        if state.idle == self.workers {
            debug!(%worker, generation = state.generation, "elected tag-advance leader");
            let decision = lead();
            state.idle = 0;
            state.generation += 1;
            if decision == TagDecision::Stop {
                self.terminated.store(true, Ordering::Release);
            }
            self.released.notify_all();
            return match decision {
                TagDecision::Continue => BarrierOutcome::Advanced { leader: true },
                TagDecision::Stop => BarrierOutcome::Terminated { leader: true },
            };
        }

        let generation = state.generation;
        while state.generation == generation && !self.is_poisoned() {
            self.released.wait(&mut state);
        }

        if self.is_poisoned() {
            BarrierOutcome::Poisoned
        } else if self.is_terminated() {
            BarrierOutcome::Terminated { leader: false }
        } else {
            BarrierOutcome::Advanced { leader: false }
        }
    }

    /// Release every parked worker with [`BarrierOutcome::Poisoned`]
    pub fn poison(&self) {
        let _state = self.state.lock();
        self.poisoned.store(true, Ordering::Release);
        self.terminated.store(true, Ordering::Release);
        self.released.notify_all();
    }
}
