//! Quasi-static tape interpreter
//!
//! [`QsScheduler`] is the single scheduler instance shared by every worker.
//! Each worker walks its own tape of the active variant; all per-tag
//! decisions were made offline, so the hot path is a fetch, an exhaustive
//! match and at most one atomic load per instruction.
//!
//! # Worker protocol
//!
//! ```text
//! loop {
//!     match scheduler.get_ready_reaction(worker)? {
//!         Some(reaction) => { run(reaction); scheduler.report_done(worker, reaction)?; }
//!         None => break,
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::advance::{TagAdvancer, TagDecision};
use crate::barrier::{BarrierOutcome, QuiescenceBarrier};
use crate::channel::{ChannelTable, Semaphore};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::instruction::Instruction;
use crate::reaction::ReactionTable;
use crate::schedule::ScheduleTable;
use crate::types::{ChannelId, ReactionId, Tag, WorkerId};

/// Counters accumulated over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tag advances performed by a leader (excluding the initial tag)
    pub tags: u64,
    /// Reactions handed to a worker
    pub dispatched: u64,
    /// `Exec` instructions passed over because the reaction was not queued
    pub skipped: u64,
    /// Completions reported
    pub completed: u64,
    pub waits: u64,
    pub notifies: u64,
    /// Reactions still queued when their tag ended
    pub stale_triggers: u64,
}

#[derive(Debug, Default)]
struct Counters {
    tags: AtomicU64,
    dispatched: AtomicU64,
    skipped: AtomicU64,
    completed: AtomicU64,
    waits: AtomicU64,
    notifies: AtomicU64,
    stale_triggers: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            tags: self.tags.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            notifies: self.notifies.load(Ordering::Relaxed),
            stale_triggers: self.stale_triggers.load(Ordering::Relaxed),
        }
    }
}

/// Scheduler instance shared by all workers for the lifetime of a run
pub struct QsScheduler<A: TagAdvancer> {
    config: SchedulerConfig,
    table: ScheduleTable,
    reactions: ReactionTable,
    /// One program counter per worker, indexing its tape in the active variant
    pcs: Vec<AtomicUsize>,
    schedule_index: AtomicUsize,
    channels: ChannelTable,
    barrier: QuiescenceBarrier,
    advancer: Mutex<A>,
    tag: AtomicU64,
    /// Fatal error raised inside the leader's critical section
    fatal: Mutex<Option<Error>>,
    counters: Counters,
}

impl<A: TagAdvancer> QsScheduler<A> {
    /// Validate the table and allocate the scheduler tables
    pub fn initialize(config: SchedulerConfig, table: ScheduleTable, advancer: A) -> Result<Self> {
        table.validate()?;

        let workers = table.worker_count;
        if config.workers != 0 && config.workers != workers {
            return Err(Error::InvalidTable(format!(
                "configured for {} workers but the table was synthesized for {}",
                config.workers, workers
            )));
        }
        if config.initial_variant >= table.variants.len() {
            return Err(Error::InvalidTable(format!(
                "initial variant {} out of range ({} variants)",
                config.initial_variant,
                table.variants.len()
            )));
        }

        info!(
            workers,
            reactions = table.reaction_count,
            channels = table.channel_count,
            variants = table.variants.len(),
            "scheduler initialized"
        );

        Ok(Self {
            pcs: (0..workers).map(|_| AtomicUsize::new(0)).collect(),
            schedule_index: AtomicUsize::new(config.initial_variant),
            reactions: ReactionTable::new(table.reaction_count),
            channels: ChannelTable::new(table.channel_count),
            barrier: QuiescenceBarrier::new(workers),
            advancer: Mutex::new(advancer),
            tag: AtomicU64::new(0),
            fatal: Mutex::new(None),
            counters: Counters::default(),
            config,
            table,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.pcs.len()
    }

    pub fn table(&self) -> &ScheduleTable {
        &self.table
    }

    pub fn reactions(&self) -> &ReactionTable {
        &self.reactions
    }

    pub fn current_tag(&self) -> Tag {
        Tag {
            index: self.tag.load(Ordering::Acquire),
        }
    }

    pub fn schedule_index(&self) -> usize {
        self.schedule_index.load(Ordering::Acquire)
    }

    pub fn pc(&self, worker: WorkerId) -> Option<usize> {
        self.pcs.get(worker.index()).map(|pc| pc.load(Ordering::Acquire))
    }

    pub fn is_terminated(&self) -> bool {
        self.barrier.is_terminated()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    /// Ask the advancer for tag 0 and select its variant
    ///
    /// Call once, before any worker starts. Returns the advancer's decision;
    /// on `Stop` the program has nothing to run.
    pub fn advance_initial_tag(&self) -> Result<TagDecision> {
        let decision = self
            .advancer
            .lock()
            .advance_tag(&self.reactions, Tag::default())?;
        if decision == TagDecision::Continue {
            self.select_variant()?;
        }
        debug!(?decision, variant = self.schedule_index(), "initial tag");
        Ok(decision)
    }

    /// Mark a reaction eligible at the current tag
    pub fn trigger(&self, reaction: ReactionId) -> Result<bool> {
        self.reactions.trigger(reaction)
    }

    /// Return the next reaction `worker` should run, or `None` at termination
    ///
    /// Blocks at `Wait` instructions and at the quiescence barrier.
    pub fn get_ready_reaction(&self, worker: WorkerId) -> Result<Option<ReactionId>> {
        let pc_slot = self.pc_slot(worker)?;

        loop {
            let variant = self.schedule_index.load(Ordering::Acquire);
            let pc = pc_slot.load(Ordering::Acquire);
            let inst = self.fetch(variant, worker, pc)?;
            trace!(%worker, variant, pc, %inst, "decode");

            match inst {
                Instruction::Exec(reaction) => {
                    pc_slot.store(pc + 1, Ordering::Release);
                    if self.reactions.is_queued(reaction) {
                        Counters::bump(&self.counters.dispatched);
                        return Ok(Some(reaction));
                    }
                    Counters::bump(&self.counters.skipped);
                }
                Instruction::Wait(channel) => {
                    let semaphore = self.channel(channel, variant, worker, pc)?;
                    if !semaphore.acquire() {
                        return Err(Error::Poisoned);
                    }
                    Counters::bump(&self.counters.waits);
                    pc_slot.store(pc + 1, Ordering::Release);
                }
                Instruction::Notify(channel) => {
                    self.channel(channel, variant, worker, pc)?.release(1);
                    Counters::bump(&self.counters.notifies);
                    pc_slot.store(pc + 1, Ordering::Release);
                }
                Instruction::Stop => match self.barrier.arrive(worker, || self.lead()) {
                    // The leader reset every pc to 0, possibly on a new variant.
                    BarrierOutcome::Advanced { .. } => {}
                    BarrierOutcome::Terminated { leader } => {
                        if leader && let Some(err) = self.fatal.lock().take() {
                            return Err(err);
                        }
                        trace!(%worker, "worker exiting");
                        return Ok(None);
                    }
                    BarrierOutcome::Poisoned => return Err(Error::Poisoned),
                },
            }
        }
    }

    /// Retire a reaction previously returned by [`get_ready_reaction`](Self::get_ready_reaction)
    pub fn report_done(&self, worker: WorkerId, reaction: ReactionId) -> Result<()> {
        self.pc_slot(worker)?;
        self.reactions.complete(worker, reaction)?;
        Counters::bump(&self.counters.completed);
        Ok(())
    }

    /// Shut down after a fatal error: wake every worker blocked on a channel
    /// or at the barrier so they can return [`Error::Poisoned`]
    pub fn poison(&self) {
        warn!("scheduler poisoned");
        self.barrier.poison();
        self.channels.poison_all();
    }

    /// Tear down the instance and report the run counters
    pub fn shutdown(self) -> SchedulerStats {
        let stats = self.counters.snapshot();
        if !self.channels.is_balanced() {
            warn!("channels hold unconsumed permits at shutdown");
        }
        info!(
            tags = stats.tags,
            dispatched = stats.dispatched,
            skipped = stats.skipped,
            "scheduler shut down"
        );
        stats
    }

    fn pc_slot(&self, worker: WorkerId) -> Result<&AtomicUsize> {
        self.pcs.get(worker.index()).ok_or(Error::InvalidWorker {
            worker,
            workers: self.pcs.len(),
        })
    }

    fn fetch(&self, variant: usize, worker: WorkerId, pc: usize) -> Result<Instruction> {
        self.table
            .variant(variant)
            .and_then(|v| v.tape(worker))
            .and_then(|t| t.get(pc))
            .copied()
            .ok_or_else(|| {
                error!(%worker, variant, pc, "fetch outside the schedule table");
                Error::MalformedTape {
                    variant,
                    worker,
                    pc,
                    message: "program counter out of bounds".into(),
                }
            })
    }

    fn channel(&self, channel: ChannelId, variant: usize, worker: WorkerId, pc: usize) -> Result<&Semaphore> {
        self.channels.get(channel).ok_or_else(|| {
            error!(%worker, %channel, "unknown channel");
            Error::MalformedTape {
                variant,
                worker,
                pc,
                message: format!("unknown channel {}", channel),
            }
        })
    }

    /// Point the interpreter at the variant covering the queued reactions
    fn select_variant(&self) -> Result<usize> {
        let queued = self.reactions.queued();
        let index = self.table.select_variant(&queued);
        if let Some(variant) = self.table.variant(index)
            && let Some(missing) = queued.iter().find(|r| !variant.covers(**r))
        {
            error!(reaction = %missing, "no schedule variant covers a queued reaction");
            return Err(Error::InvalidTable(format!(
                "no schedule variant covers queued reaction {}",
                missing
            )));
        }
        self.schedule_index.store(index, Ordering::Release);
        Ok(index)
    }

    /// Leader's critical section, run under the barrier mutex
    fn lead(&self) -> TagDecision {
        let next = self.current_tag().next();

        let stale = self.reactions.queued();
        if !stale.is_empty() {
            warn!(tag = %self.current_tag(), ?stale, "reactions queued after their EXE was passed");
            self.counters
                .stale_triggers
                .fetch_add(stale.len() as u64, Ordering::Relaxed);
            self.reactions.clear();
        }

        let decision = match self.advancer.lock().advance_tag(&self.reactions, next) {
            Ok(decision) => decision,
            Err(err) => {
                error!(%next, %err, "tag advance failed");
                *self.fatal.lock() = Some(err);
                return TagDecision::Stop;
            }
        };

        if decision == TagDecision::Stop {
            info!(%next, "stop condition reached");
            return TagDecision::Stop;
        }

        let variant = match self.select_variant() {
            Ok(variant) => variant,
            Err(err) => {
                *self.fatal.lock() = Some(err);
                return TagDecision::Stop;
            }
        };
        for pc in &self.pcs {
            pc.store(0, Ordering::Release);
        }
        self.tag.store(next.index, Ordering::Release);
        Counters::bump(&self.counters.tags);
        debug!(%next, variant, "tag advanced");
        TagDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advance::TagScript;
    use crate::instruction::Instruction::{Exec, Notify, Stop, Wait};
    use crate::schedule::{ScheduleVariant, Tape};

    fn r(id: u32) -> ReactionId {
        ReactionId(id)
    }

    fn single_worker_table() -> ScheduleTable {
        ScheduleTable::new(
            1,
            3,
            0,
            vec![ScheduleVariant::new(
                "steady",
                vec![Tape::new(vec![Exec(r(0)), Exec(r(1)), Exec(r(2)), Stop])],
                vec![r(0), r(1), r(2)],
            )],
        )
        .unwrap()
    }

    fn scheduler(table: ScheduleTable, script: Vec<Vec<ReactionId>>) -> QsScheduler<TagScript> {
        QsScheduler::initialize(SchedulerConfig::default(), table, TagScript::new(script)).unwrap()
    }

    #[test]
    fn test_idle_tag_returns_nothing() {
        // Tag 0 has no triggers and the script ends after it.
        let sched = scheduler(single_worker_table(), vec![vec![]]);
        assert_eq!(sched.advance_initial_tag().unwrap(), TagDecision::Continue);
        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), None);

        let stats = sched.shutdown();
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.dispatched, 0);
    }

    #[test]
    fn test_triggered_reaction_returned_exactly_once() {
        let sched = scheduler(single_worker_table(), vec![vec![r(1)]]);
        sched.advance_initial_tag().unwrap();

        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), Some(r(1)));
        assert_eq!(sched.pc(WorkerId(0)), Some(2));
        sched.report_done(WorkerId(0), r(1)).unwrap();

        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), None);
        assert_eq!(sched.stats().dispatched, 1);
    }

    #[test]
    fn test_trigger_during_tag_is_picked_up_downstream() {
        let sched = scheduler(single_worker_table(), vec![vec![r(0)]]);
        sched.advance_initial_tag().unwrap();

        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), Some(r(0)));
        sched.trigger(r(2)).unwrap();
        sched.report_done(WorkerId(0), r(0)).unwrap();
        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), Some(r(2)));
        sched.report_done(WorkerId(0), r(2)).unwrap();
        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), None);
    }

    #[test]
    fn test_tapes_replay_across_tags() {
        let sched = scheduler(single_worker_table(), vec![vec![r(0)], vec![r(0)], vec![r(1)]]);
        sched.advance_initial_tag().unwrap();

        let mut seen = Vec::new();
        while let Some(reaction) = sched.get_ready_reaction(WorkerId(0)).unwrap() {
            seen.push((sched.current_tag().index, reaction));
            sched.report_done(WorkerId(0), reaction).unwrap();
        }
        assert_eq!(seen, vec![(0, r(0)), (1, r(0)), (2, r(1))]);
        assert_eq!(sched.stats().tags, 2);
    }

    #[test]
    fn test_report_done_on_inactive_is_fatal() {
        let sched = scheduler(single_worker_table(), vec![vec![]]);
        assert!(matches!(
            sched.report_done(WorkerId(0), r(2)),
            Err(Error::LifecycleViolation { .. })
        ));
    }

    #[test]
    fn test_invalid_worker() {
        let sched = scheduler(single_worker_table(), vec![]);
        assert!(matches!(
            sched.get_ready_reaction(WorkerId(3)),
            Err(Error::InvalidWorker { workers: 1, .. })
        ));
    }

    #[test]
    fn test_worker_count_mismatch_rejected() {
        let config = SchedulerConfig {
            workers: 2,
            ..SchedulerConfig::default()
        };
        let result = QsScheduler::initialize(config, single_worker_table(), TagScript::default());
        assert!(matches!(result, Err(Error::InvalidTable(_))));
    }

    #[test]
    fn test_advancer_error_surfaces_on_leader() {
        let sched = scheduler(single_worker_table(), vec![vec![], vec![r(9)]]);
        sched.advance_initial_tag().unwrap();
        assert!(matches!(
            sched.get_ready_reaction(WorkerId(0)),
            Err(Error::UnknownReaction(ReactionId(9)))
        ));
        assert!(sched.is_terminated());
    }

    #[test]
    fn test_variant_switch_on_tag_advance() {
        let startup = ScheduleVariant::new(
            "startup",
            vec![Tape::new(vec![Exec(r(2)), Stop])],
            vec![r(2)],
        );
        let steady = ScheduleVariant::new(
            "steady",
            vec![Tape::new(vec![Exec(r(0)), Exec(r(1)), Exec(r(2)), Stop])],
            vec![r(0), r(1), r(2)],
        );
        let table = ScheduleTable::new(1, 3, 0, vec![startup, steady]).unwrap();
        let sched = scheduler(table, vec![vec![r(2)], vec![r(0)]]);

        sched.advance_initial_tag().unwrap();
        assert_eq!(sched.schedule_index(), 0);
        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), Some(r(2)));
        sched.report_done(WorkerId(0), r(2)).unwrap();

        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), Some(r(0)));
        assert_eq!(sched.schedule_index(), 1);
        sched.report_done(WorkerId(0), r(0)).unwrap();
        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), None);
    }

    #[test]
    fn test_stale_trigger_is_cleared_at_tag_end() {
        let sched = scheduler(single_worker_table(), vec![vec![r(1)], vec![]]);
        sched.advance_initial_tag().unwrap();
        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), Some(r(1)));
        // r0's EXE is already behind the program counter.
        sched.trigger(r(0)).unwrap();
        sched.report_done(WorkerId(0), r(1)).unwrap();
        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), None);
        assert_eq!(sched.stats().stale_triggers, 1);
        assert!(!sched.reactions().is_queued(r(0)));
    }

    #[test]
    fn test_cross_worker_wait_blocks_until_notify() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;
        use std::thread;
        use std::time::Duration;

        let table = ScheduleTable::new(
            2,
            2,
            1,
            vec![ScheduleVariant::new(
                "steady",
                vec![
                    Tape::new(vec![Exec(r(0)), Notify(ChannelId(0)), Stop]),
                    Tape::new(vec![Wait(ChannelId(0)), Exec(r(1)), Stop]),
                ],
                vec![r(0), r(1)],
            )],
        )
        .unwrap();
        let sched = Arc::new(scheduler(table, vec![vec![r(0), r(1)]]));
        sched.advance_initial_tag().unwrap();

        let upstream_done = Arc::new(AtomicBool::new(false));
        let downstream = {
            let sched = Arc::clone(&sched);
            let upstream_done = Arc::clone(&upstream_done);
            thread::spawn(move || {
                let got = sched.get_ready_reaction(WorkerId(1)).unwrap();
                assert!(upstream_done.load(Ordering::SeqCst));
                assert_eq!(got, Some(r(1)));
                sched.report_done(WorkerId(1), r(1)).unwrap();
                sched.get_ready_reaction(WorkerId(1)).unwrap()
            })
        };

        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), Some(r(0)));
        thread::sleep(Duration::from_millis(20));
        upstream_done.store(true, Ordering::SeqCst);
        sched.report_done(WorkerId(0), r(0)).unwrap();
        assert_eq!(sched.get_ready_reaction(WorkerId(0)).unwrap(), None);
        assert_eq!(downstream.join().unwrap(), None);
    }
}
