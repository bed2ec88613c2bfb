//! Integration test harness for Cadence.
//!
//! This crate provides utilities for end-to-end testing of the full
//! pipeline: Graph → Synthesize → Run on worker threads → Verify trace.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use cadence_compiler::{PrecedenceGraph, SynthesisConfig, TagShape, compile};
use cadence_runtime::{
    Program, QsScheduler, ReactionContext, ReactionId, RunOptions, RunReport, ScheduleTable,
    SchedulerConfig, SchedulerStats, Tag, TagScript, WorkerId,
};

/// One reaction execution observed by the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub reaction: ReactionId,
    pub worker: WorkerId,
    pub tag: Tag,
    /// Position in the global event order when the body started
    pub started: u64,
    /// Position in the global event order when the body returned
    pub finished: u64,
}

/// Test harness for synthesizing a graph and running it on real threads.
pub struct TestHarness {
    graph: PrecedenceGraph,
    table: ScheduleTable,
    delays: HashMap<(u64, ReactionId), Duration>,
}

impl TestHarness {
    /// Synthesize a graph of `reactions` unit-cost reactions for `workers`.
    ///
    /// # Panics
    ///
    /// Panics if the graph is invalid or synthesis fails.
    pub fn from_edges(reactions: u32, edges: &[(u32, u32)], workers: usize) -> Self {
        Self::with_shapes(reactions, edges, workers, &[])
    }

    /// Like [`from_edges`](Self::from_edges) with tag shapes.
    pub fn with_shapes(reactions: u32, edges: &[(u32, u32)], workers: usize, shapes: &[TagShape]) -> Self {
        let mut graph = PrecedenceGraph::new();
        for id in 0..reactions {
            graph
                .add_reaction(ReactionId(id), format!("r{}", id))
                .unwrap_or_else(|e| panic!("bad reaction: {}", e));
        }
        for (from, to) in edges {
            graph
                .add_edge(ReactionId(*from), ReactionId(*to))
                .unwrap_or_else(|e| panic!("bad edge: {}", e));
        }
        Self::from_graph(graph, &SynthesisConfig::with_workers(workers), shapes)
    }

    /// Synthesize an existing graph.
    ///
    /// # Panics
    ///
    /// Panics if synthesis reports an error.
    pub fn from_graph(graph: PrecedenceGraph, config: &SynthesisConfig, shapes: &[TagShape]) -> Self {
        let result = compile(&graph, shapes, config);
        let table = match result.table {
            Some(table) => table,
            None => panic!("Synthesis failed: {:?}", result.diagnostics),
        };
        Self {
            graph,
            table,
            delays: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &PrecedenceGraph {
        &self.graph
    }

    pub fn table(&self) -> &ScheduleTable {
        &self.table
    }

    /// Make `reaction` sleep for `delay` when it runs at tag `tag`.
    pub fn set_delay(&mut self, tag: u64, reaction: ReactionId, delay: Duration) {
        self.delays.insert((tag, reaction), delay);
    }

    /// Run one tag per entry of `tags`, each triggering the listed reactions.
    pub fn run_script(&self, tags: Vec<Vec<ReactionId>>) -> HarnessRun {
        self.run_with(TagScript::new(tags), |_| Ok(()))
    }

    /// Run with a custom advancer and an extra body hook called after each
    /// reaction's recorded work.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler cannot be initialized or the run fails.
    pub fn run_with<A, F>(&self, advancer: A, hook: F) -> HarnessRun
    where
        A: cadence_runtime::TagAdvancer,
        F: Fn(&ReactionContext) -> cadence_runtime::Result<()> + Send + Sync + Clone + 'static,
    {
        match self.try_run_with(advancer, hook) {
            Ok(run) => run,
            Err(e) => panic!("Run failed: {}", e),
        }
    }

    /// Fallible form of [`run_with`](Self::run_with).
    pub fn try_run_with<A, F>(&self, advancer: A, hook: F) -> cadence_runtime::Result<HarnessRun>
    where
        A: cadence_runtime::TagAdvancer,
        F: Fn(&ReactionContext) -> cadence_runtime::Result<()> + Send + Sync + Clone + 'static,
    {
        let trace: Arc<Mutex<Vec<Execution>>> = Arc::new(Mutex::new(Vec::new()));
        let delays = Arc::new(self.delays.clone());
        let clock = Arc::new(AtomicU64::new(0));

        let mut program = Program::new();
        for _ in 0..self.table.reaction_count {
            let trace = Arc::clone(&trace);
            let delays = Arc::clone(&delays);
            let clock = Arc::clone(&clock);
            let hook = hook.clone();
            program.register(Box::new(move |ctx: &ReactionContext| {
                let started = clock.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = delays.get(&(ctx.tag.index, ctx.reaction)) {
                    thread::sleep(*delay);
                }
                hook(ctx)?;
                let finished = clock.fetch_add(1, Ordering::SeqCst);
                trace.lock().push(Execution {
                    reaction: ctx.reaction,
                    worker: ctx.worker,
                    tag: ctx.tag,
                    started,
                    finished,
                });
                Ok(())
            }));
        }

        let config = SchedulerConfig {
            workers: self.table.worker_count,
            ..SchedulerConfig::default()
        };
        let scheduler = QsScheduler::initialize(config, self.table.clone(), advancer)?;
        let report = cadence_runtime::run(&scheduler, &program, &RunOptions::default())?;
        let stats = scheduler.shutdown();
        let trace = std::mem::take(&mut *trace.lock());

        Ok(HarnessRun { report, stats, trace })
    }
}

/// Outcome of a harness run
#[derive(Debug)]
pub struct HarnessRun {
    pub report: RunReport,
    pub stats: SchedulerStats,
    pub trace: Vec<Execution>,
}

impl HarnessRun {
    /// Reactions executed at `tag`, sorted by id
    pub fn executed_at(&self, tag: u64) -> Vec<ReactionId> {
        let mut reactions: Vec<ReactionId> = self
            .trace
            .iter()
            .filter(|e| e.tag.index == tag)
            .map(|e| e.reaction)
            .collect();
        reactions.sort();
        reactions
    }

    pub fn execution(&self, tag: u64, reaction: ReactionId) -> Option<&Execution> {
        self.trace
            .iter()
            .find(|e| e.tag.index == tag && e.reaction == reaction)
    }

    /// True when `before` finished before `after` started at `tag`
    ///
    /// # Panics
    ///
    /// Panics if either reaction did not run at `tag`.
    pub fn ordered(&self, tag: u64, before: ReactionId, after: ReactionId) -> bool {
        let a = self
            .execution(tag, before)
            .unwrap_or_else(|| panic!("{} did not run at tag {}", before, tag));
        let b = self
            .execution(tag, after)
            .unwrap_or_else(|| panic!("{} did not run at tag {}", after, tag));
        a.finished < b.started
    }

    /// How many times each reaction ran at `tag`
    pub fn run_counts(&self, tag: u64) -> HashMap<ReactionId, usize> {
        let mut counts = HashMap::new();
        for execution in self.trace.iter().filter(|e| e.tag.index == tag) {
            *counts.entry(execution.reaction).or_default() += 1;
        }
        counts
    }
}
