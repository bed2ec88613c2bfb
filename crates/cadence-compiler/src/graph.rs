//! Precedence graph
//!
//! Reactions plus must-happen-before edges. An edge `a -> b` means that
//! whenever both run at the same tag, `a` completes before `b` starts.
//!
//! # JSON format
//!
//! ```json
//! {
//!   "reactions": [{"id": 0, "name": "sense", "cost": 2}, {"id": 1, "name": "act"}],
//!   "edges": [[0, 1]]
//! }
//! ```
//!
//! `name` and `cost` are optional (cost defaults to 1).

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cadence_runtime::ReactionId;

use crate::error::{Result, SynthesisError};

fn default_cost() -> u64 {
    1
}

/// Per-reaction metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionNode {
    #[serde(default)]
    pub name: String,
    /// Relative execution cost, used by the makespan objective
    #[serde(default = "default_cost")]
    pub cost: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReactionEntry {
    id: ReactionId,
    #[serde(flatten)]
    node: ReactionNode,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    reactions: Vec<ReactionEntry>,
    #[serde(default)]
    edges: Vec<(ReactionId, ReactionId)>,
}

/// Reactions and the precedence edges between them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GraphFile", into = "GraphFile")]
pub struct PrecedenceGraph {
    reactions: IndexMap<ReactionId, ReactionNode>,
    edges: Vec<(ReactionId, ReactionId)>,
}

impl TryFrom<GraphFile> for PrecedenceGraph {
    type Error = SynthesisError;

    fn try_from(file: GraphFile) -> Result<Self> {
        let mut graph = PrecedenceGraph::new();
        for entry in file.reactions {
            graph.add_reaction_node(entry.id, entry.node)?;
        }
        for (from, to) in file.edges {
            graph.add_edge(from, to)?;
        }
        Ok(graph)
    }
}

impl From<PrecedenceGraph> for GraphFile {
    fn from(graph: PrecedenceGraph) -> Self {
        GraphFile {
            reactions: graph
                .reactions
                .into_iter()
                .map(|(id, node)| ReactionEntry { id, node })
                .collect(),
            edges: graph.edges,
        }
    }
}

impl PrecedenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reaction with unit cost
    pub fn add_reaction(&mut self, id: ReactionId, name: impl Into<String>) -> Result<()> {
        self.add_reaction_node(
            id,
            ReactionNode {
                name: name.into(),
                cost: 1,
            },
        )
    }

    pub fn add_reaction_node(&mut self, id: ReactionId, node: ReactionNode) -> Result<()> {
        if self.reactions.contains_key(&id) {
            return Err(SynthesisError::DuplicateReaction(id));
        }
        self.reactions.insert(id, node);
        Ok(())
    }

    /// Add `from -> to`; both endpoints must already exist
    pub fn add_edge(&mut self, from: ReactionId, to: ReactionId) -> Result<()> {
        self.check_edge(from, to)?;
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
        }
        Ok(())
    }

    fn check_edge(&self, from: ReactionId, to: ReactionId) -> Result<()> {
        for id in [from, to] {
            if !self.reactions.contains_key(&id) {
                return Err(SynthesisError::UnknownReaction(id));
            }
        }
        if from == to {
            return Err(SynthesisError::SelfEdge(from));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    pub fn contains(&self, id: ReactionId) -> bool {
        self.reactions.contains_key(&id)
    }

    /// Reaction ids in declaration order
    pub fn reaction_ids(&self) -> impl Iterator<Item = ReactionId> + '_ {
        self.reactions.keys().copied()
    }

    pub fn node(&self, id: ReactionId) -> Option<&ReactionNode> {
        self.reactions.get(&id)
    }

    pub fn cost(&self, id: ReactionId) -> u64 {
        self.reactions.get(&id).map_or(1, |n| n.cost)
    }

    pub fn edges(&self) -> &[(ReactionId, ReactionId)] {
        &self.edges
    }

    /// Size of a dense status table able to hold every id
    pub fn reaction_count(&self) -> usize {
        self.reactions.keys().map(|id| id.index() + 1).max().unwrap_or(0)
    }

    pub fn successors(&self, id: ReactionId) -> impl Iterator<Item = ReactionId> + '_ {
        self.edges
            .iter()
            .filter(move |(from, _)| *from == id)
            .map(|(_, to)| *to)
    }

    pub fn predecessors(&self, id: ReactionId) -> impl Iterator<Item = ReactionId> + '_ {
        self.edges
            .iter()
            .filter(move |(_, to)| *to == id)
            .map(|(from, _)| *from)
    }

    /// Check edge endpoints and self edges
    pub fn validate(&self) -> Result<()> {
        for (from, to) in &self.edges {
            self.check_edge(*from, *to)?;
        }
        Ok(())
    }

    fn adjacency(&self) -> IndexMap<ReactionId, Vec<ReactionId>> {
        let mut adj: IndexMap<ReactionId, Vec<ReactionId>> =
            self.reactions.keys().map(|id| (*id, Vec::new())).collect();
        for (from, to) in &self.edges {
            if let Some(succ) = adj.get_mut(from) {
                succ.push(*to);
            }
        }
        adj
    }

    /// Group reactions into topological levels using Kahn's algorithm
    ///
    /// Reactions in the same level have no path between them. Levels are
    /// sorted by id so the result is deterministic.
    pub fn topological_levels(&self) -> Result<Vec<Vec<ReactionId>>> {
        self.validate()?;
        let adj = self.adjacency();

        let mut in_degree: IndexMap<ReactionId, usize> =
            self.reactions.keys().map(|id| (*id, 0)).collect();
        for (_, to) in &self.edges {
            if let Some(degree) = in_degree.get_mut(to) {
                *degree += 1;
            }
        }

        let mut levels = Vec::new();
        let mut current: Vec<ReactionId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut processed = 0;

        while !current.is_empty() {
            current.sort();
            processed += current.len();

            let mut next = Vec::new();
            for id in &current {
                for succ in adj.get(id).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(succ) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*succ);
                        }
                    }
                }
            }

            levels.push(std::mem::replace(&mut current, next));
        }

        if processed != self.reactions.len() {
            let remaining: HashSet<ReactionId> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            let path = self.trace_cycle_path(&remaining);
            debug!(?path, "cycle detected");
            return Err(SynthesisError::Cycle { path });
        }

        Ok(levels)
    }

    /// Reactions in a topological order (level by level)
    pub fn topological_order(&self) -> Result<Vec<ReactionId>> {
        Ok(self.topological_levels()?.into_iter().flatten().collect())
    }

    /// Find one concrete cycle among reactions left over by Kahn's algorithm
    ///
    /// Every leftover reaction has a leftover predecessor, so walking
    /// predecessors must revisit a reaction; the walk from that point is the
    /// cycle. Returns a path like `[a, b, c, a]`.
    fn trace_cycle_path(&self, remaining: &HashSet<ReactionId>) -> Vec<ReactionId> {
        let Some(start) = self.reaction_ids().find(|id| remaining.contains(id)) else {
            return Vec::new();
        };

        let mut walk = vec![start];
        let mut current = start;
        loop {
            let Some(pred) = self.predecessors(current).find(|p| remaining.contains(p)) else {
                return walk;
            };
            if let Some(pos) = walk.iter().position(|id| *id == pred) {
                let mut cycle: Vec<ReactionId> = walk[pos..].to_vec();
                cycle.push(pred);
                // The walk followed edges backwards.
                cycle.reverse();
                return cycle;
            }
            walk.push(pred);
            current = pred;
        }
    }

    /// Full reachability relation (`a` reaches `b` through one or more edges)
    pub fn reachability(&self) -> Result<Reachability> {
        let order = self.topological_order()?;
        let index: IndexMap<ReactionId, usize> =
            self.reactions.keys().enumerate().map(|(i, id)| (*id, i)).collect();
        let n = index.len();
        let adj = self.adjacency();
        let mut reach = vec![vec![false; n]; n];

        // Reverse topological order: successors are complete before their predecessors.
        for id in order.iter().rev() {
            let i = index[id];
            for succ in &adj[id] {
                let j = index[succ];
                reach[i][j] = true;
                let (row_i, row_j) = if i < j {
                    let (lo, hi) = reach.split_at_mut(j);
                    (&mut lo[i], &hi[0])
                } else {
                    let (lo, hi) = reach.split_at_mut(i);
                    (&mut hi[0], &lo[j])
                };
                for (dst, src) in row_i.iter_mut().zip(row_j.iter()) {
                    *dst |= *src;
                }
            }
        }

        Ok(Reachability { index, reach })
    }

    /// Drop every edge implied by a longer path
    pub fn transitive_reduction(&self) -> Result<PrecedenceGraph> {
        let reach = self.reachability()?;
        let adj = self.adjacency();
        let edges = self
            .edges
            .iter()
            .filter(|(from, to)| {
                !adj[from]
                    .iter()
                    .any(|mid| mid != to && reach.reaches(*mid, *to))
            })
            .copied()
            .collect();
        Ok(PrecedenceGraph {
            reactions: self.reactions.clone(),
            edges,
        })
    }

    /// `seeds` plus every reaction reachable from them, sorted by id
    pub fn downstream_closure(&self, seeds: &[ReactionId]) -> Result<Vec<ReactionId>> {
        for seed in seeds {
            if !self.contains(*seed) {
                return Err(SynthesisError::UnknownReaction(*seed));
            }
        }
        let adj = self.adjacency();
        let mut seen: HashSet<ReactionId> = HashSet::new();
        let mut stack: Vec<ReactionId> = seeds.to_vec();
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(adj[&id].iter().copied());
            }
        }
        let mut closure: Vec<ReactionId> = seen.into_iter().collect();
        closure.sort();
        Ok(closure)
    }

    /// Induced subgraph on `keep`, preserving orderings through removed reactions
    ///
    /// `a -> b` is an edge of the result iff `a` reaches `b` in `self`; the
    /// result is transitively reduced.
    pub fn restricted_to(&self, keep: &[ReactionId]) -> Result<PrecedenceGraph> {
        let reach = self.reachability()?;
        let mut sub = PrecedenceGraph::new();
        for id in self.reaction_ids().filter(|id| keep.contains(id)) {
            sub.reactions.insert(id, self.reactions[&id].clone());
        }
        for id in keep {
            if !self.contains(*id) {
                return Err(SynthesisError::UnknownReaction(*id));
            }
        }
        let ids: Vec<ReactionId> = sub.reaction_ids().collect();
        for from in &ids {
            for to in &ids {
                if from != to && reach.reaches(*from, *to) {
                    sub.edges.push((*from, *to));
                }
            }
        }
        sub.transitive_reduction()
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Read a graph from a JSON file
    pub fn load(path: &Path) -> std::result::Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_json(&text).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

/// Dense reachability matrix over a graph's reactions
#[derive(Debug, Clone)]
pub struct Reachability {
    index: IndexMap<ReactionId, usize>,
    reach: Vec<Vec<bool>>,
}

impl Reachability {
    /// True if there is a non-empty path `from -> ... -> to`
    pub fn reaches(&self, from: ReactionId, to: ReactionId) -> bool {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(i), Some(j)) => self.reach[*i][*j],
            _ => false,
        }
    }

    /// True if either reaction reaches the other
    pub fn ordered(&self, a: ReactionId, b: ReactionId) -> bool {
        self.reaches(a, b) || self.reaches(b, a)
    }
}
