//! Schedule data model
//!
//! A [`ScheduleTable`] holds every [`ScheduleVariant`] of a compiled program.
//! A variant is one [`Tape`] per worker plus the set of reactions it covers.
//! Tables are immutable once validated, so workers read them without locks.
//!
//! Two forms exist:
//! - [`ScheduleTable`]: decoded instructions, used by the interpreter.
//! - [`CompiledTable`]: fixed-width records plus tape lengths, the
//!   serialized contract written by the synthesizer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::instruction::{Instruction, InstructionRecord};
use crate::types::{ChannelId, ReactionId, WorkerId};

/// Instruction sequence for one worker in one variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tape {
    instructions: Vec<Instruction>,
}

impl Tape {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Reactions executed by this tape, in program order
    pub fn reactions(&self) -> impl Iterator<Item = ReactionId> + '_ {
        self.instructions.iter().filter_map(Instruction::reaction)
    }

    /// Position of the `Exec` for `reaction`, if this tape runs it
    pub fn position_of(&self, reaction: ReactionId) -> Option<usize> {
        self.instructions
            .iter()
            .position(|inst| *inst == Instruction::Exec(reaction))
    }
}

/// A complete tape assignment valid for one class of tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleVariant {
    /// Human-readable label (e.g. `startup`, `steady`)
    pub name: String,
    /// One tape per worker
    pub tapes: Vec<Tape>,
    /// Reactions covered by this variant, sorted ascending
    reactions: Vec<ReactionId>,
}

impl ScheduleVariant {
    pub fn new(name: impl Into<String>, tapes: Vec<Tape>, mut reactions: Vec<ReactionId>) -> Self {
        reactions.sort_unstable();
        reactions.dedup();
        Self {
            name: name.into(),
            tapes,
            reactions,
        }
    }

    pub fn reactions(&self) -> &[ReactionId] {
        &self.reactions
    }

    pub fn covers(&self, reaction: ReactionId) -> bool {
        self.reactions.binary_search(&reaction).is_ok()
    }

    pub fn tape(&self, worker: WorkerId) -> Option<&Tape> {
        self.tapes.get(worker.index())
    }

    /// Worker and position of the `Exec` for `reaction`
    pub fn locate(&self, reaction: ReactionId) -> Option<(WorkerId, usize)> {
        self.tapes.iter().enumerate().find_map(|(w, tape)| {
            tape.position_of(reaction).map(|pc| (WorkerId(w), pc))
        })
    }

    pub fn tape_lengths(&self) -> Vec<usize> {
        self.tapes.iter().map(Tape::len).collect()
    }
}

/// Every variant of a compiled program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTable {
    pub worker_count: usize,
    pub reaction_count: usize,
    pub channel_count: usize,
    pub variants: Vec<ScheduleVariant>,
}

impl ScheduleTable {
    /// Build and validate a table
    pub fn new(
        worker_count: usize,
        reaction_count: usize,
        channel_count: usize,
        variants: Vec<ScheduleVariant>,
    ) -> Result<Self> {
        let table = Self {
            worker_count,
            reaction_count,
            channel_count,
            variants,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn variant(&self, index: usize) -> Option<&ScheduleVariant> {
        self.variants.get(index)
    }

    /// Pick the variant for a tag given which reactions are queued
    ///
    /// Returns the first variant covering every queued reaction, falling back
    /// to the variant with the most reactions.
    pub fn select_variant(&self, queued: &[ReactionId]) -> usize {
        self.variants
            .iter()
            .position(|v| queued.iter().all(|r| v.covers(*r)))
            .unwrap_or_else(|| {
                self.variants
                    .iter()
                    .enumerate()
                    .max_by_key(|(idx, v)| (v.reactions.len(), std::cmp::Reverse(*idx)))
                    .map(|(idx, _)| idx)
                    .unwrap_or(0)
            })
    }

    /// Check every structural invariant the interpreter relies on
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::InvalidTable("worker count must be positive".into()));
        }
        if self.variants.is_empty() {
            return Err(Error::InvalidTable("table has no variants".into()));
        }
        self.validate_counts()?;
        for (idx, variant) in self.variants.iter().enumerate() {
            self.validate_variant(idx, variant)?;
        }
        Ok(())
    }

    /// Header counts must be backed by the tapes before anything is sized
    /// from them.
    fn validate_counts(&self) -> Result<()> {
        let sync_records = self
            .variants
            .iter()
            .map(|v| {
                v.tapes
                    .iter()
                    .flat_map(|t| &t.instructions)
                    .filter(|inst| matches!(inst, Instruction::Wait(_) | Instruction::Notify(_)))
                    .count()
            })
            .max()
            .unwrap_or(0);
        if self.channel_count > sync_records {
            return Err(Error::InvalidTable(format!(
                "channel count {} exceeds the {} WAIT/NOTIFY records of any variant",
                self.channel_count, sync_records
            )));
        }

        let referenced = self
            .variants
            .iter()
            .flat_map(|v| {
                let executed = v.tapes.iter().flat_map(|t| &t.instructions).filter_map(|inst| match inst {
                    Instruction::Exec(r) => Some(*r),
                    _ => None,
                });
                v.reactions.iter().copied().chain(executed)
            })
            .map(|r| r.index() + 1)
            .max()
            .unwrap_or(0);
        if self.reaction_count > referenced {
            return Err(Error::InvalidTable(format!(
                "reaction count {} exceeds the highest reaction referenced ({})",
                self.reaction_count, referenced
            )));
        }
        Ok(())
    }

    fn validate_variant(&self, idx: usize, variant: &ScheduleVariant) -> Result<()> {
        let invalid = |message: String| {
            Error::InvalidTable(format!("variant {} ({}): {}", idx, variant.name, message))
        };

        if variant.tapes.len() != self.worker_count {
            return Err(invalid(format!(
                "{} tapes for {} workers",
                variant.tapes.len(),
                self.worker_count
            )));
        }
        if let Some(r) = variant
            .reactions
            .iter()
            .find(|r| r.index() >= self.reaction_count)
        {
            return Err(invalid(format!("covers unknown reaction {}", r)));
        }

        let mut executed = HashSet::new();
        let mut waits: Vec<Option<WorkerId>> = vec![None; self.channel_count];
        let mut notifies: Vec<Option<WorkerId>> = vec![None; self.channel_count];

        for (w, tape) in variant.tapes.iter().enumerate() {
            let worker = WorkerId(w);
            match tape.instructions.last() {
                Some(Instruction::Stop) => {}
                _ => return Err(invalid(format!("tape for {} does not end with STOP", worker))),
            }
            for (pc, inst) in tape.instructions.iter().enumerate() {
                match *inst {
                    Instruction::Exec(r) => {
                        if r.index() >= self.reaction_count {
                            return Err(invalid(format!("{} pc {}: unknown reaction {}", worker, pc, r)));
                        }
                        if !variant.covers(r) {
                            return Err(invalid(format!("{} pc {}: {} not in reaction set", worker, pc, r)));
                        }
                        if !executed.insert(r) {
                            return Err(invalid(format!("{} executed more than once", r)));
                        }
                    }
                    Instruction::Wait(c) | Instruction::Notify(c) => {
                        if c.index() >= self.channel_count {
                            return Err(invalid(format!("{} pc {}: unknown channel {}", worker, pc, c)));
                        }
                        let slot = if matches!(inst, Instruction::Wait(_)) {
                            &mut waits[c.index()]
                        } else {
                            &mut notifies[c.index()]
                        };
                        if slot.replace(worker).is_some() {
                            return Err(invalid(format!("{} used by more than one {}", c, inst)));
                        }
                    }
                    Instruction::Stop => {
                        if pc + 1 != tape.len() {
                            return Err(invalid(format!("{} pc {}: STOP before end of tape", worker, pc)));
                        }
                    }
                }
            }
        }

        if executed.is_empty() {
            return Err(invalid("no EXE instruction in any tape".into()));
        }
        if let Some(missing) = variant.reactions.iter().find(|r| !executed.contains(r)) {
            return Err(invalid(format!("{} is never executed", missing)));
        }
        for c in 0..self.channel_count {
            match (waits[c], notifies[c]) {
                (None, None) => {}
                (Some(waiter), Some(notifier)) if waiter != notifier => {}
                (Some(_), Some(_)) => {
                    return Err(invalid(format!("{} waits and notifies on the same worker", ChannelId(c as u32))));
                }
                _ => {
                    return Err(invalid(format!("{} has an unmatched WAIT/NOTIFY", ChannelId(c as u32))));
                }
            }
        }

        check_deadlock_free(variant).map_err(invalid)
    }

    /// Convert to the fixed-width record form
    pub fn to_compiled(&self) -> CompiledTable {
        CompiledTable {
            worker_count: self.worker_count as u32,
            reaction_count: self.reaction_count as u32,
            channel_count: self.channel_count as u32,
            variants: self
                .variants
                .iter()
                .map(|v| CompiledVariant {
                    name: v.name.clone(),
                    tapes: v
                        .tapes
                        .iter()
                        .map(|t| t.instructions.iter().map(Instruction::to_record).collect())
                        .collect(),
                    lengths: v.tapes.iter().map(|t| t.len() as u32).collect(),
                    reactions: v.reactions.iter().map(|r| r.0).collect(),
                })
                .collect(),
        }
    }

    /// Decode and validate the fixed-width record form
    pub fn from_compiled(compiled: &CompiledTable) -> Result<Self> {
        let variants = compiled
            .variants
            .iter()
            .enumerate()
            .map(|(idx, v)| {
                let tapes: Vec<&[InstructionRecord]> = v.tapes.iter().map(Vec::as_slice).collect();
                decode_variant(idx, &v.name, &tapes, &v.lengths, &v.reactions)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(
            compiled.worker_count as usize,
            compiled.reaction_count as usize,
            compiled.channel_count as usize,
            variants,
        )
    }

    /// Decode a table compiled into the program as static arrays
    pub fn from_static(
        worker_count: usize,
        reaction_count: usize,
        channel_count: usize,
        variants: &[StaticVariant<'_>],
    ) -> Result<Self> {
        let variants = variants
            .iter()
            .enumerate()
            .map(|(idx, v)| decode_variant(idx, v.name, v.tapes, v.lengths, v.reactions))
            .collect::<Result<Vec<_>>>()?;
        Self::new(worker_count, reaction_count, channel_count, variants)
    }
}

fn decode_variant(
    index: usize,
    name: &str,
    tapes: &[&[InstructionRecord]],
    lengths: &[u32],
    reactions: &[u32],
) -> Result<ScheduleVariant> {
    if tapes.len() != lengths.len() {
        return Err(Error::InvalidTable(format!(
            "variant {}: {} tapes but {} lengths",
            name,
            tapes.len(),
            lengths.len()
        )));
    }
    let decoded = tapes
        .iter()
        .zip(lengths)
        .enumerate()
        .map(|(w, (records, &len))| {
            if records.len() != len as usize {
                return Err(Error::InvalidTable(format!(
                    "variant {}: tape {} has {} records, length table says {}",
                    name,
                    w,
                    records.len(),
                    len
                )));
            }
            records
                .iter()
                .enumerate()
                .map(|(pc, record)| {
                    record.decode().map_err(|opcode| Error::MalformedTape {
                        variant: index,
                        worker: WorkerId(w),
                        pc,
                        message: format!("unknown opcode {:#04x} ({})", opcode, name),
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Tape::new)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ScheduleVariant::new(
        name,
        decoded,
        reactions.iter().copied().map(ReactionId).collect(),
    ))
}

/// Verify that program order plus NOTIFY→WAIT edges form an acyclic relation
///
/// A cycle means some WAIT can never be released, whatever the thread
/// interleaving.
fn check_deadlock_free(variant: &ScheduleVariant) -> std::result::Result<(), String> {
    // Node = (worker, pc). Each worker contributes a chain; each channel one cross edge.
    let offsets: Vec<usize> = variant
        .tapes
        .iter()
        .scan(0, |acc, t| {
            let start = *acc;
            *acc += t.len();
            Some(start)
        })
        .collect();
    let total: usize = variant.tapes.iter().map(Tape::len).sum();
    let mut succ: Vec<Vec<usize>> = vec![Vec::new(); total];
    let mut in_degree = vec![0usize; total];
    let mut notify_at = Vec::new();
    let mut wait_at = Vec::new();

    for (w, tape) in variant.tapes.iter().enumerate() {
        for (pc, inst) in tape.instructions.iter().enumerate() {
            let node = offsets[w] + pc;
            if pc + 1 < tape.len() {
                succ[node].push(node + 1);
                in_degree[node + 1] += 1;
            }
            match inst {
                Instruction::Notify(c) => notify_at.push((*c, node)),
                Instruction::Wait(c) => wait_at.push((*c, node)),
                _ => {}
            }
        }
    }
    for (c, from) in &notify_at {
        if let Some((_, to)) = wait_at.iter().find(|(wc, _)| wc == c) {
            succ[*from].push(*to);
            in_degree[*to] += 1;
        }
    }

    let mut ready: Vec<usize> = (0..total).filter(|n| in_degree[*n] == 0).collect();
    let mut visited = 0;
    while let Some(node) = ready.pop() {
        visited += 1;
        for &next in &succ[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(next);
            }
        }
    }

    if visited == total {
        Ok(())
    } else {
        Err("WAIT/NOTIFY pairs form a cycle with program order".into())
    }
}

/// Serialized form of a [`ScheduleTable`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTable {
    pub worker_count: u32,
    pub reaction_count: u32,
    pub channel_count: u32,
    pub variants: Vec<CompiledVariant>,
}

/// Serialized form of a [`ScheduleVariant`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledVariant {
    pub name: String,
    pub tapes: Vec<Vec<InstructionRecord>>,
    /// Parallel to `tapes`
    pub lengths: Vec<u32>,
    pub reactions: Vec<u32>,
}

/// A variant embedded in the program binary as static arrays
#[derive(Debug, Clone, Copy)]
pub struct StaticVariant<'a> {
    pub name: &'a str,
    pub tapes: &'a [&'a [InstructionRecord]],
    pub lengths: &'a [u32],
    pub reactions: &'a [u32],
}
