//! Worker pool executor
//!
//! Drives a [`QsScheduler`] with one OS thread per worker. Each thread loops
//! `get_ready_reaction` → reaction body → `report_done` until the scheduler
//! terminates. A fatal error on any worker poisons the scheduler so blocked
//! peers wake up and the run can report the first error.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, trace};

use crate::advance::{TagAdvancer, TagDecision};
use crate::config::RunOptions;
use crate::error::{Error, Result};
use crate::reaction::ReactionTable;
use crate::scheduler::{QsScheduler, SchedulerStats};
use crate::types::{ReactionId, Tag, WorkerId};

/// Body of a reaction
pub type ReactionFn = Box<dyn Fn(&ReactionContext) -> Result<()> + Send + Sync>;

/// Context available to a running reaction
pub struct ReactionContext<'a> {
    /// Worker executing the reaction
    pub worker: WorkerId,
    /// The reaction itself
    pub reaction: ReactionId,
    /// Logical tag the reaction runs at
    pub tag: Tag,
    reactions: &'a ReactionTable,
}

impl<'a> ReactionContext<'a> {
    /// Make a downstream reaction eligible at the current tag
    ///
    /// The target must come after this reaction on the tapes, otherwise its
    /// `Exec` was already passed and the trigger is dropped at tag end.
    pub fn trigger(&self, reaction: ReactionId) -> Result<bool> {
        self.reactions.trigger(reaction)
    }

    pub fn is_queued(&self, reaction: ReactionId) -> bool {
        self.reactions.is_queued(reaction)
    }
}

/// Reaction bodies indexed by [`ReactionId`]
#[derive(Default)]
pub struct Program {
    bodies: Vec<ReactionFn>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` reactions that do nothing
    pub fn noop(count: usize) -> Self {
        let mut program = Self::new();
        for _ in 0..count {
            program.register(Box::new(|_| Ok(())));
        }
        program
    }

    /// Register a reaction body, returns its id
    pub fn register(&mut self, body: ReactionFn) -> ReactionId {
        let id = ReactionId(self.bodies.len() as u32);
        self.bodies.push(body);
        id
    }

    /// Replace the body of an already registered reaction
    pub fn replace(&mut self, reaction: ReactionId, body: ReactionFn) -> Result<()> {
        let slot = self
            .bodies
            .get_mut(reaction.index())
            .ok_or(Error::UnknownReaction(reaction))?;
        *slot = body;
        Ok(())
    }

    pub fn body(&self, reaction: ReactionId) -> Option<&ReactionFn> {
        self.bodies.get(reaction.index())
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Tags executed, including tag 0
    pub tags: u64,
    /// Reactions executed by each worker
    pub executed: Vec<u64>,
    pub stats: SchedulerStats,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total_executed(&self) -> u64 {
        self.executed.iter().sum()
    }
}

/// Run `program` on `scheduler` until the tag advancer stops
#[instrument(skip_all, name = "run", fields(workers = scheduler.worker_count()))]
pub fn run<A: TagAdvancer>(
    scheduler: &QsScheduler<A>,
    program: &Program,
    options: &RunOptions,
) -> Result<RunReport> {
    let reaction_count = scheduler.table().reaction_count;
    if program.len() < reaction_count {
        error!(bodies = program.len(), reaction_count, "program is missing reaction bodies");
        return Err(Error::InvalidTable(format!(
            "table has {} reactions but the program defines {}",
            reaction_count,
            program.len()
        )));
    }

    let start = Instant::now();
    let workers = scheduler.worker_count();

    if options.advance_initial_tag && scheduler.advance_initial_tag()? == TagDecision::Stop {
        info!("advancer stopped before the first tag");
        return Ok(RunReport {
            tags: 0,
            executed: vec![0; workers],
            stats: scheduler.stats(),
            elapsed: start.elapsed(),
        });
    }

    info!(workers, "starting workers");
    let results: Vec<Result<u64>> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        let mut spawn_error = None;
        for index in 0..workers {
            let worker = WorkerId(index);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", scheduler.config().thread_name, index))
                .spawn_scoped(scope, move || worker_thread(scheduler, program, worker));
            match spawned {
                Ok(handle) => handles.push((worker, handle)),
                Err(err) => {
                    error!(%worker, %err, "failed to spawn worker thread");
                    scheduler.poison();
                    spawn_error = Some(Error::Spawn {
                        worker,
                        message: err.to_string(),
                    });
                    break;
                }
            }
        }
        let mut results: Vec<Result<u64>> = handles
            .into_iter()
            .map(|(worker, handle)| handle.join().unwrap_or(Err(Error::WorkerPanicked(worker))))
            .collect();
        results.extend(spawn_error.map(Err));
        results
    });

    let mut executed = Vec::with_capacity(workers);
    let mut first_error = None;
    for result in results {
        match result {
            Ok(count) => executed.push(count),
            Err(err) => {
                executed.push(0);
                // Prefer the root cause over the Poisoned errors it induced.
                let replace = match &first_error {
                    None => true,
                    Some(Error::Poisoned) => !matches!(err, Error::Poisoned),
                    Some(_) => false,
                };
                if replace {
                    first_error = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_error {
        error!(%err, "run failed");
        return Err(err);
    }

    let report = RunReport {
        tags: scheduler.current_tag().index + 1,
        executed,
        stats: scheduler.stats(),
        elapsed: start.elapsed(),
    };
    info!(
        tags = report.tags,
        executed = report.total_executed(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "run complete"
    );
    Ok(report)
}

fn worker_thread<A: TagAdvancer>(
    scheduler: &QsScheduler<A>,
    program: &Program,
    worker: WorkerId,
) -> Result<u64> {
    let result = catch_unwind(AssertUnwindSafe(|| worker_loop(scheduler, program, worker)))
        .unwrap_or_else(|_| {
            error!(%worker, "worker panicked");
            Err(Error::WorkerPanicked(worker))
        });

    match &result {
        Ok(executed) => debug!(%worker, executed, "worker finished"),
        Err(Error::Poisoned) => debug!(%worker, "worker released by poisoning"),
        Err(err) => {
            error!(%worker, %err, "worker failed");
            scheduler.poison();
        }
    }
    result
}

fn worker_loop<A: TagAdvancer>(
    scheduler: &QsScheduler<A>,
    program: &Program,
    worker: WorkerId,
) -> Result<u64> {
    let mut executed = 0;
    while let Some(reaction) = scheduler.get_ready_reaction(worker)? {
        let body = program
            .body(reaction)
            .ok_or(Error::UnknownReaction(reaction))?;
        let ctx = ReactionContext {
            worker,
            reaction,
            tag: scheduler.current_tag(),
            reactions: scheduler.reactions(),
        };
        trace!(%worker, %reaction, tag = %ctx.tag, "executing");
        body(&ctx)?;
        scheduler.report_done(worker, reaction)?;
        executed += 1;
    }
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advance::{Periodic, TagScript};
    use crate::config::SchedulerConfig;
    use crate::instruction::Instruction::{Exec, Notify, Stop, Wait};
    use crate::schedule::{ScheduleTable, ScheduleVariant, Tape};
    use crate::types::ChannelId;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn r(id: u32) -> ReactionId {
        ReactionId(id)
    }

    /// W=2, edges 0→1 (worker 0) and 2→3 (worker 1), no channels
    fn two_chains() -> ScheduleTable {
        ScheduleTable::new(
            2,
            4,
            0,
            vec![ScheduleVariant::new(
                "steady",
                vec![
                    Tape::new(vec![Exec(r(0)), Exec(r(1)), Stop]),
                    Tape::new(vec![Exec(r(2)), Exec(r(3)), Stop]),
                ],
                vec![r(0), r(1), r(2), r(3)],
            )],
        )
        .unwrap()
    }

    fn recording_program(count: usize, log: &Arc<Mutex<Vec<(u64, ReactionId)>>>) -> Program {
        let mut program = Program::new();
        for _ in 0..count {
            let log = Arc::clone(log);
            program.register(Box::new(move |ctx| {
                log.lock().push((ctx.tag.index, ctx.reaction));
                Ok(())
            }));
        }
        program
    }

    #[test]
    fn test_two_independent_chains() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let program = recording_program(4, &log);
        let scheduler = QsScheduler::initialize(
            SchedulerConfig::default(),
            two_chains(),
            TagScript::new(vec![vec![r(0), r(1), r(2), r(3)]]),
        )
        .unwrap();

        let report = run(&scheduler, &program, &RunOptions::default()).unwrap();
        assert_eq!(report.tags, 1);
        assert_eq!(report.executed, vec![2, 2]);

        let log = log.lock();
        let pos = |id| log.iter().position(|(_, r)| *r == ReactionId(id)).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn test_downstream_trigger_runs_same_tag() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut program = recording_program(4, &log);
        {
            let log = Arc::clone(&log);
            program
                .replace(
                    r(0),
                    Box::new(move |ctx| {
                        log.lock().push((ctx.tag.index, ctx.reaction));
                        ctx.trigger(ReactionId(1))?;
                        Ok(())
                    }),
                )
                .unwrap();
        }
        let scheduler = QsScheduler::initialize(
            SchedulerConfig::default(),
            two_chains(),
            Periodic::new(vec![r(0)], 3),
        )
        .unwrap();

        let report = run(&scheduler, &program, &RunOptions::default()).unwrap();
        assert_eq!(report.tags, 3);
        assert_eq!(report.executed, vec![6, 0]);
        assert_eq!(report.stats.stale_triggers, 0);

        let log = log.lock();
        for tag in 0..3 {
            let ran: Vec<_> = log.iter().filter(|(t, _)| *t == tag).map(|(_, r)| *r).collect();
            assert_eq!(ran, vec![r(0), r(1)]);
        }
    }

    #[test]
    fn test_stop_before_first_tag() {
        let scheduler =
            QsScheduler::initialize(SchedulerConfig::default(), two_chains(), TagScript::default())
                .unwrap();
        let report = run(&scheduler, &Program::noop(4), &RunOptions::default()).unwrap();
        assert_eq!(report.tags, 0);
        assert_eq!(report.total_executed(), 0);
    }

    #[test]
    fn test_missing_bodies_rejected() {
        let scheduler =
            QsScheduler::initialize(SchedulerConfig::default(), two_chains(), TagScript::default())
                .unwrap();
        assert!(matches!(
            run(&scheduler, &Program::noop(2), &RunOptions::default()),
            Err(Error::InvalidTable(_))
        ));
    }

    #[test]
    fn test_reaction_error_poisons_blocked_peer() {
        // Worker 1 waits on a channel that worker 0 never notifies.
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
        let mut program = Program::noop(2);
        program
            .replace(
                r(0),
                Box::new(|ctx: &ReactionContext| -> Result<()> {
                    Err(Error::ReactionFailed {
                        reaction: ctx.reaction,
                        message: "sensor offline".into(),
                    })
                }),
            )
            .unwrap();
        let scheduler = QsScheduler::initialize(
            SchedulerConfig::default(),
            table,
            TagScript::new(vec![vec![r(0), r(1)]]),
        )
        .unwrap();

        let err = run(&scheduler, &program, &RunOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ReactionFailed { reaction: ReactionId(0), .. }));
    }

    #[test]
    fn test_panicking_reaction_reported() {
        let mut program = Program::noop(4);
        program
            .replace(
                r(2),
                Box::new(|ctx: &ReactionContext| -> Result<()> {
                    panic!("{} panicked", ctx.reaction)
                }),
            )
            .unwrap();
        let scheduler = QsScheduler::initialize(
            SchedulerConfig::default(),
            two_chains(),
            TagScript::new(vec![vec![r(0), r(2)]]),
        )
        .unwrap();

        let err = run(&scheduler, &program, &RunOptions::default()).unwrap_err();
        assert!(matches!(err, Error::WorkerPanicked(WorkerId(1))));
    }

    #[test]
    fn test_every_reaction_runs_once_per_tag() {
        let counts: Arc<Vec<AtomicU64>> = Arc::new((0..4).map(|_| AtomicU64::new(0)).collect());
        let mut program = Program::new();
        for _ in 0..4 {
            let counts = Arc::clone(&counts);
            program.register(Box::new(move |ctx| {
                counts[ctx.reaction.index()].fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        let scheduler = QsScheduler::initialize(
            SchedulerConfig::default(),
            two_chains(),
            Periodic::new(vec![r(0), r(1), r(2), r(3)], 25),
        )
        .unwrap();

        let report = run(&scheduler, &program, &RunOptions::default()).unwrap();
        assert_eq!(report.tags, 25);
        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 25));
        assert_eq!(report.stats.tags, 24);
    }
}
