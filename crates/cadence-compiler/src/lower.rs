//! Lowering assignments to tapes
//!
//! Each worker's row becomes a tape: for every reaction, a `Wait` per kept
//! incoming cross-worker edge, the `Exec`, then a `Notify` per kept outgoing
//! cross-worker edge. Every tape ends with `Stop`.
//!
//! Synchronisation is pruned in two steps when enabled. Edges implied by a
//! longer path are dropped (transitive reduction). A cross edge `p -> r` is
//! also dropped when a kept edge `p' -> r'` between the same two workers has
//! `p'` at or after `p` and `r'` at or before `r`: that pair already orders
//! `p` before `r`.

use std::collections::HashMap;

use tracing::debug;

use cadence_runtime::{ChannelId, Instruction, ReactionId, ScheduleVariant, Tape};

use crate::error::{Result, SynthesisError};
use crate::graph::PrecedenceGraph;

/// A cross-worker edge that received a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEdge {
    pub channel: ChannelId,
    pub from: ReactionId,
    pub to: ReactionId,
}

/// Tapes for one variant plus the synchronisation they use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lowered {
    pub tapes: Vec<Tape>,
    pub sync: Vec<SyncEdge>,
    /// Cross-worker edges dropped because another pair between the same
    /// workers already orders them
    pub pruned: usize,
}

impl Lowered {
    pub fn channel_count(&self) -> usize {
        self.sync.len()
    }

    pub fn into_variant(self, name: impl Into<String>, reactions: Vec<ReactionId>) -> ScheduleVariant {
        ScheduleVariant::new(name, self.tapes, reactions)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    worker: usize,
    index: usize,
}

/// Lower `rows` (one per worker) to tapes, synchronising `graph`'s edges
pub fn lower(graph: &PrecedenceGraph, rows: &[Vec<ReactionId>], prune: bool) -> Result<Lowered> {
    let mut slot_of: HashMap<ReactionId, Slot> = HashMap::new();
    for (worker, row) in rows.iter().enumerate() {
        for (index, reaction) in row.iter().enumerate() {
            if slot_of.insert(*reaction, Slot { worker, index }).is_some() {
                return Err(SynthesisError::Internal(format!("{} assigned twice", reaction)));
            }
        }
    }
    let locate = |id: ReactionId| {
        slot_of
            .get(&id)
            .copied()
            .ok_or_else(|| SynthesisError::Internal(format!("{} has no slot", id)))
    };

    let edges = if prune {
        graph.transitive_reduction()?.edges().to_vec()
    } else {
        graph.edges().to_vec()
    };

    let mut cross = Vec::new();
    for (from, to) in edges {
        let (a, b) = (locate(from)?, locate(to)?);
        if a.worker == b.worker {
            if a.index >= b.index {
                return Err(SynthesisError::Internal(format!(
                    "{} placed after {} on w{}",
                    from, to, a.worker
                )));
            }
            continue;
        }
        cross.push((from, a, to, b));
    }
    let total_cross = cross.len();

    if prune {
        // Earliest target first, latest source first within a target, so a
        // dominating edge is always seen before the edges it covers.
        cross.sort_by_key(|(_, a, _, b)| (b.worker, a.worker, b.index, std::cmp::Reverse(a.index)));
        let mut latest_source: HashMap<(usize, usize), usize> = HashMap::new();
        cross.retain(|(_, a, _, b)| {
            let pair = (a.worker, b.worker);
            if latest_source.get(&pair).is_some_and(|latest| *latest >= a.index) {
                return false;
            }
            latest_source.insert(pair, a.index);
            true
        });
    }

    cross.sort_by_key(|(_, a, _, b)| (b.worker, b.index, a.worker, a.index));
    let sync: Vec<SyncEdge> = cross
        .iter()
        .enumerate()
        .map(|(c, (from, _, to, _))| SyncEdge {
            channel: ChannelId(c as u32),
            from: *from,
            to: *to,
        })
        .collect();

    let mut waits: HashMap<ReactionId, Vec<ChannelId>> = HashMap::new();
    let mut notifies: HashMap<ReactionId, Vec<ChannelId>> = HashMap::new();
    for edge in &sync {
        waits.entry(edge.to).or_default().push(edge.channel);
        notifies.entry(edge.from).or_default().push(edge.channel);
    }

    let tapes = rows
        .iter()
        .map(|row| {
            let mut tape = Vec::with_capacity(row.len() + 1);
            for reaction in row {
                if let Some(channels) = waits.get(reaction) {
                    tape.extend(channels.iter().map(|c| Instruction::Wait(*c)));
                }
                tape.push(Instruction::Exec(*reaction));
                if let Some(channels) = notifies.get(reaction) {
                    tape.extend(channels.iter().map(|c| Instruction::Notify(*c)));
                }
            }
            tape.push(Instruction::Stop);
            Tape::new(tape)
        })
        .collect();

    let pruned = total_cross - sync.len();
    debug!(channels = sync.len(), pruned, "lowered to tapes");
    Ok(Lowered { tapes, sync, pruned })
}
