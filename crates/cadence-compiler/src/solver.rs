//! Branch-and-bound schedule search
//!
//! Reactions are assigned to workers one at a time in a fixed priority
//! order: longest remaining cost-weighted path first, ties broken by
//! topological level and then id. That order is a topological order, so
//! appending each reaction to the end of its worker's row always satisfies
//! the precedence constraints and the search only chooses workers.
//!
//! - Symmetry breaking: workers are interchangeable, so a reaction may go to
//!   worker `w` only if `w <= highest used worker + 1`.
//! - The incumbent is seeded by a greedy earliest-finish list schedule.
//! - Subtrees whose lower bound on the primary objective exceeds the
//!   incumbent are pruned.
//! - The search stops after `max_search_nodes` nodes and keeps the best
//!   assignment found.
//!
//! Balance is measured on estimated tape lengths, which count the `Wait` and
//! `Notify` each cross-worker edge of the reduced graph adds. Costs add up
//! saturating, so absurd costs from a graph file cannot overflow.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use cadence_runtime::ReactionId;

use crate::config::SynthesisConfig;
use crate::error::{Result, SynthesisError};
use crate::graph::PrecedenceGraph;
use crate::model::{ObjectiveKind, ScheduleMetrics};

/// Best assignment found by the search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// One row of reactions per worker, in execution order
    pub rows: Vec<Vec<ReactionId>>,
    pub metrics: ScheduleMetrics,
    /// Search nodes visited
    pub nodes: u64,
    /// False when the node budget ran out before the search space was exhausted
    pub complete: bool,
}

/// Search state shared by every node
struct Search<'a> {
    config: &'a SynthesisConfig,
    workers: usize,
    order: Vec<ReactionId>,
    cost: Vec<u64>,
    /// Predecessors in the reduced graph, as indices into `order`
    preds: Vec<Vec<usize>>,
    /// Longest cost-weighted path starting at each reaction
    bottom: Vec<u64>,
    total_cost: u64,
    /// Most instructions reactions `depth..` can still add across all tapes
    growth: Vec<u64>,

    rows: Vec<Vec<usize>>,
    row_finish: Vec<u64>,
    finish: Vec<u64>,
    worker_of: Vec<usize>,
    /// Estimated tape length per worker, `Stop` excluded
    lengths: Vec<u64>,
    channels: u64,
    makespan: u64,

    best: Option<(Vec<Vec<usize>>, ScheduleMetrics)>,
    nodes: u64,
    exhausted: bool,
}

/// Find an assignment of `graph`'s reactions to `config.workers` rows
///
/// `reduced` must be the transitive reduction of `graph`; it defines the
/// cross-worker channels counted by the objective.
pub fn solve(graph: &PrecedenceGraph, reduced: &PrecedenceGraph, config: &SynthesisConfig) -> Result<Assignment> {
    let workers = config.workers;
    if workers == 0 {
        return Err(SynthesisError::NoWorkers);
    }
    if graph.is_empty() {
        return Err(SynthesisError::EmptyGraph);
    }
    if config.require_all_workers && workers > graph.len() {
        return Err(SynthesisError::TooManyWorkers {
            workers,
            reactions: graph.len(),
        });
    }

    let mut search = Search::new(graph, reduced, config)?;
    search.seed_greedy();
    search.branch(0);

    let complete = !search.exhausted;
    if !complete {
        warn!(
            nodes = search.nodes,
            budget = config.max_search_nodes,
            "search budget exhausted; keeping best schedule found"
        );
    }

    let nodes = search.nodes;
    let order = search.order.clone();
    let (rows, metrics) = search
        .best
        .ok_or_else(|| SynthesisError::Infeasible("search found no complete assignment".into()))?;
    let rows = rows
        .into_iter()
        .map(|row| row.into_iter().map(|i| order[i]).collect())
        .collect();

    debug!(nodes, complete, ?metrics, "search finished");
    Ok(Assignment {
        rows,
        metrics,
        nodes,
        complete,
    })
}

impl<'a> Search<'a> {
    fn new(graph: &PrecedenceGraph, reduced: &PrecedenceGraph, config: &'a SynthesisConfig) -> Result<Self> {
        let levels = graph.topological_levels()?;
        let level_of: HashMap<ReactionId, usize> = levels
            .iter()
            .enumerate()
            .flat_map(|(l, ids)| ids.iter().map(move |id| (*id, l)))
            .collect();

        // Bottom levels, computed in reverse topological order.
        let mut bottom_of: HashMap<ReactionId, u64> = HashMap::new();
        for id in levels.iter().flatten().rev() {
            let tail = reduced
                .successors(*id)
                .filter_map(|s| bottom_of.get(&s))
                .max()
                .copied()
                .unwrap_or(0);
            bottom_of.insert(*id, graph.cost(*id).saturating_add(tail));
        }

        let mut order: Vec<ReactionId> = graph.reaction_ids().collect();
        order.sort_by_key(|id| (std::cmp::Reverse(bottom_of[id]), level_of[id], *id));

        let index: HashMap<ReactionId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let preds: Vec<Vec<usize>> = order
            .iter()
            .map(|id| {
                let mut p: Vec<usize> = reduced.predecessors(*id).map(|p| index[&p]).collect();
                p.sort_unstable();
                p
            })
            .collect();
        let cost: Vec<u64> = order.iter().map(|id| graph.cost(*id)).collect();
        let bottom = order.iter().map(|id| bottom_of[id]).collect();
        // An Exec plus, per incoming edge, at most a Wait and a Notify.
        let mut growth = vec![0u64; order.len() + 1];
        for (i, p) in preds.iter().enumerate().rev() {
            growth[i] = growth[i + 1] + 1 + 2 * p.len() as u64;
        }
        trace!(?order, "priority order");

        let workers = config.workers;
        let n = order.len();
        Ok(Self {
            config,
            workers,
            total_cost: cost.iter().fold(0, |sum, c| sum.saturating_add(*c)),
            growth,
            order,
            cost,
            preds,
            bottom,
            rows: vec![Vec::new(); workers],
            row_finish: vec![0; workers],
            finish: vec![0; n],
            worker_of: vec![usize::MAX; n],
            lengths: vec![0; workers],
            channels: 0,
            makespan: 0,
            best: None,
            nodes: 0,
            exhausted: false,
        })
    }

    fn objective(&self) -> ObjectiveKind {
        self.config.objective
    }

    fn earliest_start(&self, i: usize, worker: usize) -> u64 {
        self.preds[i]
            .iter()
            .map(|p| self.finish[*p])
            .fold(self.row_finish[worker], u64::max)
    }

    fn cross_edges(&self, i: usize, worker: usize) -> u64 {
        self.preds[i]
            .iter()
            .filter(|p| self.worker_of[**p] != worker)
            .count() as u64
    }

    /// Reaction `i` on `worker`; returns what [`Self::unplace`] needs
    fn place(&mut self, i: usize, worker: usize) -> (u64, u64, u64) {
        let undo = (self.row_finish[worker], self.makespan, self.channels);
        let end = self.earliest_start(i, worker).saturating_add(self.cost[i]);
        let cross = self.cross_edges(i, worker);
        self.channels += cross;
        self.lengths[worker] += 1 + cross;
        self.shift_notifies(i, worker, true);
        self.finish[i] = end;
        self.worker_of[i] = worker;
        self.row_finish[worker] = end;
        self.makespan = self.makespan.max(end);
        self.rows[worker].push(i);
        undo
    }

    fn unplace(&mut self, i: usize, worker: usize, undo: (u64, u64, u64)) {
        self.shift_notifies(i, worker, false);
        self.lengths[worker] -= 1 + self.cross_edges(i, worker);
        self.rows[worker].pop();
        self.worker_of[i] = usize::MAX;
        (self.row_finish[worker], self.makespan, self.channels) = undo;
    }

    /// One `Notify` on each producer's tape for `i`'s cross edges
    fn shift_notifies(&mut self, i: usize, worker: usize, add: bool) {
        for p in &self.preds[i] {
            let producer = self.worker_of[*p];
            if producer != worker {
                if add {
                    self.lengths[producer] += 1;
                } else {
                    self.lengths[producer] -= 1;
                }
            }
        }
    }

    fn empty_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.is_empty()).count()
    }

    /// Workers reaction `depth` may be placed on
    fn candidates(&self, depth: usize) -> Vec<usize> {
        let highest_used = self.rows.iter().rposition(|r| !r.is_empty());
        let limit = highest_used.map_or(0, |h| h + 1).min(self.workers - 1);
        let remaining = self.order.len() - depth;
        let must_fill = self.config.require_all_workers && remaining <= self.empty_rows();
        (0..=limit)
            .filter(|w| !must_fill || self.rows[*w].is_empty())
            .collect()
    }

    fn metrics(&self) -> ScheduleMetrics {
        let (spread, variance) = ScheduleMetrics::balance(&self.lengths);
        ScheduleMetrics {
            makespan: self.makespan,
            spread,
            variance,
            channels: self.channels,
        }
    }

    /// Lower bound on the primary objective of any completion
    fn lower_bound(&self, depth: usize) -> u64 {
        match self.objective() {
            ObjectiveKind::Makespan => {
                let work = self.total_cost.div_ceil(self.workers as u64);
                let paths = (depth..self.order.len())
                    .map(|i| {
                        let ready = self.preds[i]
                            .iter()
                            .filter(|p| **p < depth)
                            .map(|p| self.finish[*p])
                            .max()
                            .unwrap_or(0);
                        ready.saturating_add(self.bottom[i])
                    })
                    .max()
                    .unwrap_or(0);
                self.makespan.max(work).max(paths)
            }
            ObjectiveKind::Balance => {
                let max = self.lengths.iter().copied().max().unwrap_or(0);
                let min = self.lengths.iter().copied().min().unwrap_or(0);
                (max - min).saturating_sub(self.growth[depth])
            }
        }
    }

    fn offer(&mut self) {
        let metrics = self.metrics();
        let objective = self.objective();
        let better = self
            .best
            .as_ref()
            .is_none_or(|(_, best)| metrics.cost(objective) < best.cost(objective));
        if better {
            trace!(?metrics, nodes = self.nodes, "new incumbent");
            self.best = Some((self.rows.clone(), metrics));
        }
    }

    /// Earliest-finish list schedule, ties to fewer channels then lower worker
    fn seed_greedy(&mut self) {
        let mut placed = Vec::with_capacity(self.order.len());
        for i in 0..self.order.len() {
            let Some(worker) = self
                .candidates(i)
                .into_iter()
                .min_by_key(|w| (self.earliest_start(i, *w) + self.cost[i], self.cross_edges(i, *w), *w))
            else {
                break;
            };
            placed.push((i, worker, self.place(i, worker)));
        }
        if placed.len() == self.order.len() {
            self.offer();
        }
        for (i, worker, undo) in placed.into_iter().rev() {
            self.unplace(i, worker, undo);
        }
    }

    fn branch(&mut self, depth: usize) {
        if self.exhausted {
            return;
        }
        self.nodes += 1;
        if self.nodes > self.config.max_search_nodes {
            self.exhausted = true;
            return;
        }

        if depth == self.order.len() {
            self.offer();
            return;
        }

        if let Some((_, best)) = &self.best
            && self.lower_bound(depth) > best.cost(self.objective())[0]
        {
            return;
        }

        let mut candidates = self.candidates(depth);
        // Explore the most promising worker first.
        candidates.sort_by_key(|w| (self.earliest_start(depth, *w), self.cross_edges(depth, *w), *w));
        for worker in candidates {
            let undo = self.place(depth, worker);
            self.branch(depth + 1);
            self.unplace(depth, worker, undo);
            if self.exhausted {
                return;
            }
        }
    }
}
