//! Tape instruction set
//!
//! Four instructions, one integer operand each. In memory an instruction is
//! an enum decoded by exhaustive match; at the artefact boundary it is a
//! fixed-width [`InstructionRecord`] of `(opcode, operand)`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, ReactionId};

/// Opcode byte for [`Instruction::Exec`]
pub const OP_EXEC: u8 = b'e';
/// Opcode byte for [`Instruction::Wait`]
pub const OP_WAIT: u8 = b'w';
/// Opcode byte for [`Instruction::Notify`]
pub const OP_NOTIFY: u8 = b'n';
/// Opcode byte for [`Instruction::Stop`]
pub const OP_STOP: u8 = b's';

/// Tape instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    /// Hand the reaction to the worker if it is queued at this tag
    Exec(ReactionId),
    /// Block until the matching `Notify` on the channel has been issued
    Wait(ChannelId),
    /// Release one waiter on the channel
    Notify(ChannelId),
    /// End of useful work for this tag; enter the quiescence barrier
    Stop,
}

impl Instruction {
    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::Exec(_) => OP_EXEC,
            Instruction::Wait(_) => OP_WAIT,
            Instruction::Notify(_) => OP_NOTIFY,
            Instruction::Stop => OP_STOP,
        }
    }

    pub fn operand(&self) -> u32 {
        match self {
            Instruction::Exec(r) => r.0,
            Instruction::Wait(c) | Instruction::Notify(c) => c.0,
            Instruction::Stop => 0,
        }
    }

    /// The reaction referenced by an `Exec`
    pub fn reaction(&self) -> Option<ReactionId> {
        match self {
            Instruction::Exec(r) => Some(*r),
            _ => None,
        }
    }

    /// The channel referenced by a `Wait` or `Notify`
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Instruction::Wait(c) | Instruction::Notify(c) => Some(*c),
            _ => None,
        }
    }

    pub fn to_record(&self) -> InstructionRecord {
        InstructionRecord::new(self.opcode(), self.operand())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Exec(r) => write!(f, "EXE {}", r),
            Instruction::Wait(c) => write!(f, "WAIT {}", c),
            Instruction::Notify(c) => write!(f, "NOTIFY {}", c),
            Instruction::Stop => write!(f, "STOP"),
        }
    }
}

/// Fixed-width wire form of an instruction
///
/// This is the byte-level contract between synthesized tables and the
/// interpreter. Field order and widths must not change within a bundle
/// version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct InstructionRecord {
    pub opcode: u8,
    pub operand: u32,
}

impl InstructionRecord {
    pub const fn new(opcode: u8, operand: u32) -> Self {
        Self { opcode, operand }
    }

    pub const fn exec(reaction: u32) -> Self {
        Self::new(OP_EXEC, reaction)
    }

    pub const fn wait(channel: u32) -> Self {
        Self::new(OP_WAIT, channel)
    }

    pub const fn notify(channel: u32) -> Self {
        Self::new(OP_NOTIFY, channel)
    }

    pub const fn stop() -> Self {
        Self::new(OP_STOP, 0)
    }

    /// Decode into an [`Instruction`]
    ///
    /// Returns the offending opcode when it is not part of the instruction set.
    pub fn decode(&self) -> std::result::Result<Instruction, u8> {
        match self.opcode {
            OP_EXEC => Ok(Instruction::Exec(ReactionId(self.operand))),
            OP_WAIT => Ok(Instruction::Wait(ChannelId(self.operand))),
            OP_NOTIFY => Ok(Instruction::Notify(ChannelId(self.operand))),
            OP_STOP => Ok(Instruction::Stop),
            other => Err(other),
        }
    }
}

impl From<Instruction> for InstructionRecord {
    fn from(inst: Instruction) -> Self {
        inst.to_record()
    }
}
