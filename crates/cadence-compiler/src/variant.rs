//! Schedule variants
//!
//! A single schedule for the full graph is correct at every tag but makes
//! every worker walk past the `Exec` of each reaction that did not trigger.
//! Programs with distinct classes of tags (startup, a rarely firing timer)
//! can declare a [`TagShape`] per class. Each shape is closed under
//! downstream reachability, so reactions triggered during the tag are
//! covered too, and synthesized on its own restricted graph.
//!
//! At runtime the interpreter picks the first variant covering every queued
//! reaction. The full-graph variant is always last, so selection never fails.

use std::collections::HashSet;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cadence_runtime::ReactionId;

use crate::config::SynthesisConfig;
use crate::error::{Result, SynthesisError};
use crate::graph::PrecedenceGraph;
use crate::{Synthesis, synthesize_named};

/// Name of the variant covering the whole graph
pub const FULL_VARIANT: &str = "full";

/// A class of tags, given by the reactions that may be triggered at them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagShape {
    pub name: String,
    pub reactions: Vec<ReactionId>,
}

impl TagShape {
    pub fn new(name: impl Into<String>, reactions: Vec<ReactionId>) -> Self {
        Self {
            name: name.into(),
            reactions,
        }
    }

    /// Read a JSON list of shapes
    pub fn load_all(path: &Path) -> std::result::Result<Vec<TagShape>, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

/// A variant ready for synthesis
#[derive(Debug, Clone)]
pub struct VariantPlan {
    pub name: String,
    /// Reactions covered, sorted by id
    pub reactions: Vec<ReactionId>,
    pub graph: PrecedenceGraph,
}

/// Close each shape downstream and restrict the graph to it
///
/// Shapes come first in declaration order, followed by the full variant.
pub fn plan_variants(graph: &PrecedenceGraph, shapes: &[TagShape]) -> Result<Vec<VariantPlan>> {
    let mut names: HashSet<&str> = HashSet::new();
    let mut plans = Vec::with_capacity(shapes.len() + 1);

    for shape in shapes {
        let invalid = |message: String| SynthesisError::InvalidShape {
            name: shape.name.clone(),
            message,
        };
        if shape.name == FULL_VARIANT {
            return Err(invalid(format!("'{}' is reserved", FULL_VARIANT)));
        }
        if !names.insert(shape.name.as_str()) {
            return Err(invalid("declared twice".into()));
        }
        if shape.reactions.is_empty() {
            return Err(invalid("no reactions".into()));
        }
        if let Some(unknown) = shape.reactions.iter().find(|r| !graph.contains(**r)) {
            return Err(invalid(format!("unknown reaction {}", unknown)));
        }

        let reactions = graph.downstream_closure(&shape.reactions)?;
        debug!(
            shape = %shape.name,
            declared = shape.reactions.len(),
            closed = reactions.len(),
            "tag shape closed downstream"
        );
        plans.push(VariantPlan {
            name: shape.name.clone(),
            graph: graph.restricted_to(&reactions)?,
            reactions,
        });
    }

    let mut all: Vec<ReactionId> = graph.reaction_ids().collect();
    all.sort();
    plans.push(VariantPlan {
        name: FULL_VARIANT.to_string(),
        reactions: all,
        graph: graph.clone(),
    });
    Ok(plans)
}

/// Synthesize every plan in parallel, results in plan order
pub fn synthesize_variants(plans: &[VariantPlan], config: &SynthesisConfig) -> Vec<Result<Synthesis>> {
    plans
        .par_iter()
        .map(|plan| synthesize_named(&plan.name, &plan.graph, config))
        .collect()
}
