//! Control flow edge types for the CFG.
//!
//! Edges classify how control reaches a block: regular flow (fall-through,
//! jumps, branch outcomes) or exceptional flow into a handler. Exception
//! edges additionally reference the protected range that produced them.

use crate::cfg::BlockId;

/// Stable index of a [`crate::cfg::ProtectedRange`] within the CFG arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeId(usize);

impl RangeId {
    /// Creates a range ID from a raw index.
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

/// The kind of control flow represented by an edge.
///
/// Conditional branch polarity is conveyed by edge order rather than kind:
/// for a block ending in a conditional branch, the first regular successor
/// is the branch target (condition true) and the second is the fall-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgEdgeKind {
    /// Regular control flow: fall-through, unconditional jump, branch
    /// outcome or switch dispatch.
    Regular,
    /// Flow into an exception handler.
    ///
    /// References the protected range whose handler is the edge target;
    /// after deobfuscation every handler is reachable only via such edges.
    Exception {
        /// The protected range this edge belongs to.
        range: RangeId,
    },
}

impl CfgEdgeKind {
    /// Returns `true` if this is an exception edge.
    #[must_use]
    pub const fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }
}

/// A directed edge from one basic block to another.
///
/// The source is implicit: edges are stored in their source block's
/// successor list inside the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgEdge {
    /// Destination block.
    pub target: BlockId,
    /// Edge classification.
    pub kind: CfgEdgeKind,
}

impl CfgEdge {
    /// Creates a regular edge to `target`.
    #[must_use]
    pub const fn regular(target: BlockId) -> Self {
        Self {
            target,
            kind: CfgEdgeKind::Regular,
        }
    }

    /// Creates an exception edge to `target` for the given protected range.
    #[must_use]
    pub const fn exception(target: BlockId, range: RangeId) -> Self {
        Self {
            target,
            kind: CfgEdgeKind::Exception { range },
        }
    }
}
