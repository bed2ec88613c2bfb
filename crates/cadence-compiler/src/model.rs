//! Constraint model
//!
//! Schedule synthesis is posed as a constraint-satisfaction problem over a
//! decision matrix `m[worker][slot]`, each cell holding a reaction or
//! nothing. A matrix satisfying every [`Constraint`] lowers to tapes that
//! run each reaction exactly once per tag, in an order consistent with the
//! precedence graph, without deadlock.
//!
//! # Precedence semantics
//!
//! The matrix induces a relation: program order along every row, plus every
//! precedence edge. `Precedence { before, after }` holds when that relation
//! is acyclic and, if both reactions share a row, `before` sits in the
//! earlier slot. Acyclicity is what makes the WAIT/NOTIFY pairs inserted by
//! lowering deadlock-free.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use cadence_runtime::ReactionId;

use crate::graph::PrecedenceGraph;

// ============================================================================
// Decision matrix
// ============================================================================

/// `[worker][slot] -> Option<ReactionId>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMatrix {
    cells: Vec<Vec<Option<ReactionId>>>,
}

impl SlotMatrix {
    pub fn new(workers: usize, slots: usize) -> Self {
        Self {
            cells: vec![vec![None; slots]; workers],
        }
    }

    /// Matrix with each row filled from the left by `rows`
    pub fn from_rows(rows: &[Vec<ReactionId>], slots: usize) -> Self {
        let mut matrix = Self::new(rows.len(), slots);
        for (w, row) in rows.iter().enumerate() {
            for (s, reaction) in row.iter().enumerate().take(slots) {
                matrix.cells[w][s] = Some(*reaction);
            }
        }
        matrix
    }

    pub fn workers(&self) -> usize {
        self.cells.len()
    }

    pub fn slots(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    pub fn get(&self, worker: usize, slot: usize) -> Option<ReactionId> {
        self.cells.get(worker)?.get(slot).copied().flatten()
    }

    pub fn set(&mut self, worker: usize, slot: usize, value: Option<ReactionId>) {
        if let Some(cell) = self.cells.get_mut(worker).and_then(|row| row.get_mut(slot)) {
            *cell = value;
        }
    }

    pub fn row(&self, worker: usize) -> &[Option<ReactionId>] {
        self.cells.get(worker).map_or(&[], Vec::as_slice)
    }

    /// Every occupied cell as `(worker, slot, reaction)`
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize, ReactionId)> + '_ {
        self.cells.iter().enumerate().flat_map(|(w, row)| {
            row.iter()
                .enumerate()
                .filter_map(move |(s, cell)| cell.map(|r| (w, s, r)))
        })
    }

    /// First position holding `reaction`
    pub fn position(&self, reaction: ReactionId) -> Option<(usize, usize)> {
        self.occupied()
            .find(|(_, _, r)| *r == reaction)
            .map(|(w, s, _)| (w, s))
    }
}

// ============================================================================
// Constraints
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// Every cell holds a reaction of the graph or nothing
    Domain,
    /// The reaction occupies some cell
    Coverage(ReactionId),
    /// The reaction occupies at most one cell
    Uniqueness(ReactionId),
    /// Some cell is occupied
    NonTrivial,
    /// Row `w` has no occupied cell after an empty one
    Compact(usize),
    /// `before` completes before `after` starts
    Precedence { before: ReactionId, after: ReactionId },
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Domain => write!(f, "domain"),
            Constraint::Coverage(r) => write!(f, "coverage({})", r),
            Constraint::Uniqueness(r) => write!(f, "uniqueness({})", r),
            Constraint::NonTrivial => write!(f, "non-trivial"),
            Constraint::Compact(w) => write!(f, "compact(w{})", w),
            Constraint::Precedence { before, after } => write!(f, "precedence({} < {})", before, after),
        }
    }
}

/// A constraint the matrix fails, with detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub constraint: Constraint,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.constraint, self.message)
    }
}

/// Constraint set for one graph and worker count
#[derive(Debug, Clone)]
pub struct ConstraintModel {
    workers: usize,
    slots: usize,
    reactions: Vec<ReactionId>,
    constraints: Vec<Constraint>,
}

impl ConstraintModel {
    /// Build the constraint set: `W` rows of `N` slots
    pub fn encode(graph: &PrecedenceGraph, workers: usize) -> Self {
        let reactions: Vec<ReactionId> = graph.reaction_ids().collect();
        let mut constraints = vec![Constraint::Domain, Constraint::NonTrivial];
        for r in &reactions {
            constraints.push(Constraint::Coverage(*r));
            constraints.push(Constraint::Uniqueness(*r));
        }
        constraints.extend((0..workers).map(Constraint::Compact));
        constraints.extend(
            graph
                .edges()
                .iter()
                .map(|(before, after)| Constraint::Precedence {
                    before: *before,
                    after: *after,
                }),
        );
        Self {
            workers,
            slots: reactions.len(),
            reactions,
            constraints,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// An empty matrix of the model's shape
    pub fn matrix(&self) -> SlotMatrix {
        SlotMatrix::new(self.workers, self.slots)
    }

    /// Evaluate every constraint against `matrix`
    pub fn check(&self, matrix: &SlotMatrix) -> Vec<Violation> {
        let mut violations = Vec::new();

        if matrix.workers() != self.workers || matrix.slots() != self.slots {
            violations.push(Violation {
                constraint: Constraint::Domain,
                message: format!(
                    "matrix is {}x{}, model expects {}x{}",
                    matrix.workers(),
                    matrix.slots(),
                    self.workers,
                    self.slots
                ),
            });
            return violations;
        }

        let known: HashSet<ReactionId> = self.reactions.iter().copied().collect();
        let mut positions: HashMap<ReactionId, Vec<(usize, usize)>> = HashMap::new();
        for (w, s, r) in matrix.occupied() {
            positions.entry(r).or_default().push((w, s));
        }

        let cyclic = self.cyclic_reactions(matrix);

        for constraint in &self.constraints {
            let message = match *constraint {
                Constraint::Domain => {
                    let mut foreign: Vec<_> = positions.keys().filter(|r| !known.contains(*r)).collect();
                    foreign.sort();
                    (!foreign.is_empty()).then(|| format!("unknown reactions {:?}", foreign))
                }
                Constraint::Coverage(r) => {
                    (!positions.contains_key(&r)).then(|| format!("{} is not scheduled", r))
                }
                Constraint::Uniqueness(r) => positions
                    .get(&r)
                    .filter(|cells| cells.len() > 1)
                    .map(|cells| format!("{} occupies {:?}", r, cells)),
                Constraint::NonTrivial => {
                    positions.is_empty().then(|| "every cell is empty".to_string())
                }
                Constraint::Compact(w) => {
                    let row = matrix.row(w);
                    row.iter()
                        .position(Option::is_none)
                        .filter(|gap| row[*gap..].iter().any(Option::is_some))
                        .map(|gap| format!("row has a gap at slot {}", gap))
                }
                Constraint::Precedence { before, after } => {
                    let a = positions.get(&before).and_then(|p| p.first());
                    let b = positions.get(&after).and_then(|p| p.first());
                    match (a, b) {
                        (Some((wa, sa)), Some((wb, sb))) if wa == wb && sa >= sb => Some(format!(
                            "{} at slot {} is not before {} at slot {} on w{}",
                            before, sa, after, sb, wa
                        )),
                        (Some(_), Some(_)) if cyclic.contains(&before) && cyclic.contains(&after) => {
                            Some("program order and precedence form a cycle".to_string())
                        }
                        _ => None,
                    }
                }
            };
            if let Some(message) = message {
                violations.push(Violation {
                    constraint: *constraint,
                    message,
                });
            }
        }

        violations
    }

    /// Reactions left over by Kahn's algorithm on program order ∪ precedence
    fn cyclic_reactions(&self, matrix: &SlotMatrix) -> HashSet<ReactionId> {
        let mut succ: HashMap<ReactionId, Vec<ReactionId>> = HashMap::new();
        let mut in_degree: HashMap<ReactionId, usize> = HashMap::new();
        for (_, _, r) in matrix.occupied() {
            in_degree.entry(r).or_insert(0);
        }

        let mut edges = Vec::new();
        for w in 0..matrix.workers() {
            let row: Vec<ReactionId> = matrix.row(w).iter().flatten().copied().collect();
            edges.extend(row.windows(2).map(|pair| (pair[0], pair[1])));
        }
        for constraint in &self.constraints {
            if let Constraint::Precedence { before, after } = constraint
                && in_degree.contains_key(before)
                && in_degree.contains_key(after)
            {
                edges.push((*before, *after));
            }
        }
        for (from, to) in edges {
            succ.entry(from).or_default().push(to);
            *in_degree.entry(to).or_insert(0) += 1;
        }

        let mut ready: Vec<ReactionId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(r, _)| *r)
            .collect();
        while let Some(r) = ready.pop() {
            for next in succ.get(&r).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(*next);
                    }
                }
            }
        }
        in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(r, _)| r)
            .collect()
    }
}

// ============================================================================
// Objective
// ============================================================================

/// Which metric the solver minimizes first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    /// Estimated makespan, then tape-length spread, variance and channels
    #[default]
    Makespan,
    /// Tape-length spread, then variance, channels and makespan
    Balance,
}

/// Quality measures of a complete assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleMetrics {
    /// Finish time of the last reaction under unit-free reaction costs
    pub makespan: u64,
    /// Longest tape minus shortest tape, in instructions
    pub spread: u64,
    /// `W * sum(len^2) - (sum len)^2`, which is the variance scaled by `W^2`
    pub variance: u64,
    /// Precedence edges whose endpoints sit on different workers
    pub channels: u64,
}

impl ScheduleMetrics {
    /// Lexicographic cost, smaller is better
    pub fn cost(&self, objective: ObjectiveKind) -> [u64; 4] {
        match objective {
            ObjectiveKind::Makespan => [self.makespan, self.spread, self.variance, self.channels],
            ObjectiveKind::Balance => [self.spread, self.variance, self.channels, self.makespan],
        }
    }

    /// Length spread and scaled variance of the given tape lengths
    pub fn balance(lengths: &[u64]) -> (u64, u64) {
        let max = lengths.iter().copied().max().unwrap_or(0);
        let min = lengths.iter().copied().min().unwrap_or(0);
        let sum: u64 = lengths.iter().sum();
        let sum_sq: u64 = lengths.iter().map(|l| l * l).sum();
        (max - min, lengths.len() as u64 * sum_sq - sum * sum)
    }
}

/// Objective wrapper: cost of an assignment under a chosen [`ObjectiveKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Objective {
    pub kind: ObjectiveKind,
}

impl Objective {
    pub fn new(kind: ObjectiveKind) -> Self {
        Self { kind }
    }

    /// Evaluate `rows` against `graph`; `None` if program order and
    /// precedence form a cycle
    ///
    /// `graph` is normally the transitive reduction, whose cross-worker
    /// edges are the channels lowering starts from.
    pub fn evaluate(&self, graph: &PrecedenceGraph, rows: &[Vec<ReactionId>]) -> Option<ScheduleMetrics> {
        let makespan = estimate_makespan(graph, rows)?;
        let lengths = estimate_tape_lengths(graph, rows);
        let worker_of = workers_by_reaction(rows);
        let channels = graph
            .edges()
            .iter()
            .filter(|(a, b)| worker_of.get(a) != worker_of.get(b))
            .count() as u64;
        let (spread, variance) = ScheduleMetrics::balance(&lengths);
        Some(ScheduleMetrics {
            makespan,
            spread,
            variance,
            channels,
        })
    }
}

fn workers_by_reaction(rows: &[Vec<ReactionId>]) -> HashMap<ReactionId, usize> {
    rows.iter()
        .enumerate()
        .flat_map(|(w, row)| row.iter().map(move |r| (*r, w)))
        .collect()
}

/// Tape lengths `rows` lower to when every cross-worker edge of `graph`
/// gets a channel: one `Exec` per reaction, a `Wait` on the consumer's tape
/// and a `Notify` on the producer's. `Stop` is left out since it lengthens
/// every tape alike. Dominance pruning during lowering can only shorten
/// the tapes further.
pub fn estimate_tape_lengths(graph: &PrecedenceGraph, rows: &[Vec<ReactionId>]) -> Vec<u64> {
    let mut lengths: Vec<u64> = rows.iter().map(|row| row.len() as u64).collect();
    let worker_of = workers_by_reaction(rows);
    for (from, to) in graph.edges() {
        if let (Some(a), Some(b)) = (worker_of.get(from), worker_of.get(to))
            && a != b
        {
            lengths[*a] += 1;
            lengths[*b] += 1;
        }
    }
    lengths
}

/// List-schedule finish time: each reaction starts once its row predecessor
/// and every graph predecessor have finished
pub fn estimate_makespan(graph: &PrecedenceGraph, rows: &[Vec<ReactionId>]) -> Option<u64> {
    let mut finish: HashMap<ReactionId, u64> = HashMap::new();
    let mut cursor = vec![0usize; rows.len()];
    let mut row_finish = vec![0u64; rows.len()];
    let total: usize = rows.iter().map(Vec::len).sum();

    while finish.len() < total {
        let mut progressed = false;
        for (w, row) in rows.iter().enumerate() {
            while let Some(r) = row.get(cursor[w]) {
                let mut start = row_finish[w];
                let mut blocked = false;
                for pred in graph.predecessors(*r) {
                    match finish.get(&pred) {
                        Some(f) => start = start.max(*f),
                        // Predecessors outside the rows do not constrain.
                        None if rows.iter().any(|row| row.contains(&pred)) => blocked = true,
                        None => {}
                    }
                }
                if blocked {
                    break;
                }
                let end = start.saturating_add(graph.cost(*r));
                finish.insert(*r, end);
                row_finish[w] = end;
                cursor[w] += 1;
                progressed = true;
            }
        }
        if !progressed {
            return None;
        }
    }

    Some(row_finish.into_iter().max().unwrap_or(0))
}
