//! Cadence Compiler
//!
//! Offline synthesis of quasi-static schedules. A [`PrecedenceGraph`] and a
//! worker count go in; one instruction tape per worker comes out, for every
//! declared tag shape plus the full graph.
//!
//! The pipeline per variant:
//! 1. **Validate**: reject self edges, unknown reactions and cycles.
//! 2. **Solve**: branch-and-bound over worker assignments ([`solver`]).
//! 3. **Check**: re-verify the assignment against the [`ConstraintModel`].
//! 4. **Lower**: insert `Wait`/`Notify` pairs on cross-worker edges ([`lower`]).
//!
//! [`compile`] runs the pipeline for every variant and assembles the
//! [`ScheduleTable`] consumed by `cadence_runtime`.

pub mod config;
pub mod emit;
pub mod error;
pub mod graph;
pub mod lower;
pub mod model;
pub mod solver;
pub mod variant;

use std::fmt;

use tracing::{info, instrument};

use cadence_runtime::{ReactionId, ScheduleTable, ScheduleVariant};

pub use config::SynthesisConfig;
pub use emit::emit_rust;
pub use error::{Result, SynthesisError};
pub use graph::{PrecedenceGraph, ReactionNode};
pub use lower::{Lowered, SyncEdge};
pub use model::{ConstraintModel, Objective, ObjectiveKind, ScheduleMetrics, SlotMatrix};
pub use solver::Assignment;
pub use variant::{FULL_VARIANT, TagShape, VariantPlan};

// ============================================================================
// Diagnostics
// ============================================================================

/// A message produced while compiling a schedule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    /// Variant the message refers to, if any
    pub variant: Option<String>,
    pub severity: Severity,
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Hint,
}

impl Diagnostic {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            variant: None,
            severity,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn hint(message: impl Into<String>) -> Self {
        Self::new(Severity::Hint, message)
    }

    pub fn with_variant(mut self, name: impl Into<String>) -> Self {
        self.variant = Some(name.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Hint => "hint",
        };
        match &self.variant {
            Some(name) => write!(f, "{}[{}]: {}", level, name, self.message),
            None => write!(f, "{}: {}", level, self.message),
        }
    }
}

// ============================================================================
// Synthesis
// ============================================================================

/// Synthesized schedule for one variant
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub name: String,
    /// Reactions covered, sorted by id
    pub reactions: Vec<ReactionId>,
    pub assignment: Assignment,
    pub lowered: Lowered,
}

impl Synthesis {
    pub fn channel_count(&self) -> usize {
        self.lowered.channel_count()
    }

    /// Workers left without any reaction
    pub fn idle_workers(&self) -> usize {
        self.assignment.rows.iter().filter(|row| row.is_empty()).count()
    }

    pub fn to_variant(&self) -> ScheduleVariant {
        self.lowered
            .clone()
            .into_variant(self.name.clone(), self.reactions.clone())
    }

    /// A single-variant table over `reaction_count` reaction ids
    pub fn to_table(&self, reaction_count: usize) -> cadence_runtime::Result<ScheduleTable> {
        ScheduleTable::new(
            self.lowered.tapes.len(),
            reaction_count,
            self.channel_count(),
            vec![self.to_variant()],
        )
    }
}

/// Synthesize the full-graph schedule
#[instrument(skip_all, fields(workers = config.workers, reactions = graph.len()))]
pub fn synthesize(graph: &PrecedenceGraph, config: &SynthesisConfig) -> Result<Synthesis> {
    synthesize_named(FULL_VARIANT, graph, config)
}

/// Synthesize `graph` as the variant called `name`
pub fn synthesize_named(name: &str, graph: &PrecedenceGraph, config: &SynthesisConfig) -> Result<Synthesis> {
    graph.validate()?;
    let reduced = graph.transitive_reduction()?;
    let assignment = solver::solve(graph, &reduced, config)?;
    check_assignment(graph, &reduced, &assignment, config)?;

    let lowered = lower::lower(graph, &assignment.rows, config.prune_redundant_sync)?;

    let mut reactions: Vec<ReactionId> = graph.reaction_ids().collect();
    reactions.sort();

    info!(
        variant = name,
        makespan = assignment.metrics.makespan,
        channels = lowered.channel_count(),
        pruned = lowered.pruned,
        nodes = assignment.nodes,
        "synthesized schedule"
    );
    Ok(Synthesis {
        name: name.to_string(),
        reactions,
        assignment,
        lowered,
    })
}

/// Re-verify a solver result against the constraint model and recompute its
/// metrics independently
fn check_assignment(
    graph: &PrecedenceGraph,
    reduced: &PrecedenceGraph,
    assignment: &Assignment,
    config: &SynthesisConfig,
) -> Result<()> {
    let model = ConstraintModel::encode(graph, config.workers);
    let matrix = SlotMatrix::from_rows(&assignment.rows, model.slots());
    if let Some(violation) = model.check(&matrix).into_iter().next() {
        return Err(SynthesisError::Internal(format!(
            "solver produced an invalid assignment: {}",
            violation
        )));
    }

    let expected = Objective::new(config.objective).evaluate(reduced, &assignment.rows);
    if expected != Some(assignment.metrics) {
        return Err(SynthesisError::Internal(format!(
            "solver reported {:?}, assignment evaluates to {:?}",
            assignment.metrics, expected
        )));
    }
    Ok(())
}

// ============================================================================
// Compilation
// ============================================================================

/// Per-variant summary reported by [`compile`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSummary {
    pub name: String,
    pub reactions: usize,
    pub metrics: ScheduleMetrics,
    pub channels: usize,
    pub pruned: usize,
    pub nodes: u64,
    pub complete: bool,
}

/// Outcome of [`compile`]
#[derive(Debug, Clone, Default)]
pub struct CompileResult {
    /// Present only when no error diagnostic was produced
    pub table: Option<ScheduleTable>,
    pub variants: Vec<VariantSummary>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            ..Self::default()
        }
    }
}

/// Synthesize every variant and assemble the schedule table
///
/// Variants are synthesized in parallel. Any failing variant is reported as
/// an error diagnostic and no table is produced.
#[instrument(skip_all, fields(workers = config.workers, shapes = shapes.len()))]
pub fn compile(graph: &PrecedenceGraph, shapes: &[TagShape], config: &SynthesisConfig) -> CompileResult {
    if let Err(e) = graph.validate() {
        return CompileResult::failed(Diagnostic::error(e.to_string()));
    }
    let plans = match variant::plan_variants(graph, shapes) {
        Ok(plans) => plans,
        Err(e) => return CompileResult::failed(Diagnostic::error(e.to_string())),
    };

    let mut result = CompileResult::default();
    let mut variants = Vec::with_capacity(plans.len());

    for (plan, outcome) in plans.iter().zip(variant::synthesize_variants(&plans, config)) {
        let synthesis = match outcome {
            Ok(synthesis) => synthesis,
            Err(e) => {
                result
                    .diagnostics
                    .push(Diagnostic::error(e.to_string()).with_variant(&plan.name));
                continue;
            }
        };

        if !synthesis.assignment.complete {
            result.diagnostics.push(
                Diagnostic::warning(format!(
                    "search budget of {} nodes exhausted; schedule may not be optimal",
                    config.max_search_nodes
                ))
                .with_variant(&plan.name),
            );
        }
        let idle = synthesis.idle_workers();
        if idle > 0 {
            result.diagnostics.push(
                Diagnostic::hint(format!("{} of {} workers have no reactions", idle, config.workers))
                    .with_variant(&plan.name),
            );
        }

        result.variants.push(VariantSummary {
            name: synthesis.name.clone(),
            reactions: synthesis.reactions.len(),
            metrics: synthesis.assignment.metrics,
            channels: synthesis.channel_count(),
            pruned: synthesis.lowered.pruned,
            nodes: synthesis.assignment.nodes,
            complete: synthesis.assignment.complete,
        });
        variants.push(synthesis);
    }

    if result.has_errors() {
        return result;
    }

    let channel_count = variants.iter().map(Synthesis::channel_count).max().unwrap_or(0);
    match ScheduleTable::new(
        config.workers,
        graph.reaction_count(),
        channel_count,
        variants.iter().map(Synthesis::to_variant).collect(),
    ) {
        Ok(table) => result.table = Some(table),
        Err(e) => result
            .diagnostics
            .push(Diagnostic::error(format!("synthesized table is invalid: {}", e))),
    }
    result
}
