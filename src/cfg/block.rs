//! Basic blocks and their arena indices.

use std::fmt;

use crate::bytecode::Instruction;

/// Stable index of a basic block within a [`crate::cfg::ControlFlowGraph`]
/// arena.
///
/// Block IDs are never reused; removed blocks are tombstoned instead so that
/// edges, protected ranges and statements can keep referring to blocks by
/// index across graph mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    /// Creates a block ID from a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A maximal straight-line run of instructions with a single entry and a
/// single exit.
///
/// Blocks are owned by the CFG arena. A block whose `dead` flag is set has
/// been removed from the graph; its ID stays valid but traversals skip it.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Arena index of this block.
    pub id: BlockId,
    /// Ordered instruction run.
    pub instructions: Vec<Instruction>,
    /// Tombstone flag, set by normalization when the block is removed.
    pub(crate) dead: bool,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, instructions: Vec<Instruction>) -> Self {
        Self {
            id,
            instructions,
            dead: false,
        }
    }

    /// Returns `true` if this block has been removed from the graph.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.dead
    }

    /// Bytecode offset of the first instruction, or `None` for synthetic
    /// blocks (the exit block, injected empty handlers).
    #[must_use]
    pub fn start_offset(&self) -> Option<u32> {
        self.instructions.first().map(|i| i.offset)
    }

    /// Returns the last instruction of the block, if any.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Returns `true` if the block carries no instructions (synthetic).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
