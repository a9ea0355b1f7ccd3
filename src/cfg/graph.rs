//! The control flow graph arena.

use std::collections::HashSet;
use std::fmt::Write;

use crate::{
    bytecode::Instruction,
    cfg::{BasicBlock, BlockId, CfgEdge, CfgEdgeKind, RangeId},
    Error::GraphError,
    Result,
};

/// A bytecode region covered by an exception handler (a try block).
///
/// After exception deobfuscation, no two ranges form a cycle and every
/// range's handler is reachable only via exception edges.
#[derive(Debug, Clone)]
pub struct ProtectedRange {
    /// Arena index of this range.
    pub id: RangeId,
    /// Blocks covered by the range, in instruction order.
    pub body: Vec<BlockId>,
    /// Handler entry block.
    pub handler: BlockId,
    /// Caught exception class, or `None` for catch-all / finally handlers.
    pub exception_type: Option<String>,
    /// Set once the finally processor has claimed this catch-all range as a
    /// `finally` body.
    pub(crate) is_finally: bool,
    /// Tombstone flag, set when the range is dropped by deobfuscation.
    pub(crate) removed: bool,
}

impl ProtectedRange {
    /// Returns `true` if this range has been dropped.
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.removed
    }

    /// Returns `true` if the given block is part of the protected body.
    #[must_use]
    pub fn protects(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }

    /// Returns `true` for catch-all ranges, the encoding used by `finally`.
    #[must_use]
    pub const fn is_catch_all(&self) -> bool {
        self.exception_type.is_none()
    }

    /// Returns `true` once this range has been identified as a `finally`.
    #[must_use]
    pub const fn is_finally(&self) -> bool {
        self.is_finally
    }
}

/// A control flow graph over an arena of basic blocks.
///
/// The graph owns all blocks, edges and protected ranges of one method.
/// Blocks are addressed by stable [`BlockId`] indices; removal tombstones a
/// block instead of shifting the arena, so IDs held by ranges, statements
/// and edges stay valid across mutation.
///
/// There is exactly one designated entry block, and after normalization
/// exactly one synthetic exit block reachable from every live block.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    /// Block arena.
    blocks: Vec<BasicBlock>,
    /// Outgoing edges, parallel to `blocks`.
    succs: Vec<Vec<CfgEdge>>,
    /// Incoming edge sources, parallel to `blocks`.
    preds: Vec<Vec<BlockId>>,
    /// Protected range arena.
    ranges: Vec<ProtectedRange>,
    /// Designated entry block.
    entry: BlockId,
    /// Synthetic exit block, present after normalization.
    exit: Option<BlockId>,
}

impl ControlFlowGraph {
    /// Creates an empty graph. The first block added becomes the entry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
            ranges: Vec::new(),
            entry: BlockId::new(0),
            exit: None,
        }
    }

    /// Adds a block to the arena and returns its ID.
    pub fn add_block(&mut self, instructions: Vec<Instruction>) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BasicBlock::new(id, instructions));
        self.succs.push(Vec::new());
        self.preds.push(Vec::new());
        id
    }

    /// Adds a protected range and returns its ID.
    pub fn add_range(
        &mut self,
        body: Vec<BlockId>,
        handler: BlockId,
        exception_type: Option<String>,
    ) -> RangeId {
        let id = RangeId::new(self.ranges.len());
        self.ranges.push(ProtectedRange {
            id,
            body,
            handler,
            exception_type,
            is_finally: false,
            removed: false,
        });
        id
    }

    /// Tombstones a protected range and removes its exception edges.
    pub fn remove_range(&mut self, range: RangeId) {
        if let Some(r) = self.ranges.get_mut(range.index()) {
            r.removed = true;
        }
        for source in 0..self.succs.len() {
            let removed_targets: Vec<BlockId> = self.succs[source]
                .iter()
                .filter(|e| e.kind == CfgEdgeKind::Exception { range })
                .map(|e| e.target)
                .collect();
            self.succs[source].retain(|e| e.kind != CfgEdgeKind::Exception { range });
            for target in removed_targets {
                Self::unlink_pred(&mut self.preds, BlockId::new(source), target);
            }
        }
    }

    fn unlink_pred(preds: &mut [Vec<BlockId>], source: BlockId, target: BlockId) {
        if let Some(pos) = preds[target.index()].iter().position(|&p| p == source) {
            preds[target.index()].remove(pos);
        }
    }

    /// Adds an edge, keeping the predecessor index in sync.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] if either endpoint is outside the arena.
    pub fn add_edge(&mut self, source: BlockId, edge: CfgEdge) -> Result<()> {
        if source.index() >= self.blocks.len() || edge.target.index() >= self.blocks.len() {
            return Err(GraphError(format!(
                "edge {source} -> {} references a block outside the arena",
                edge.target
            )));
        }
        self.preds[edge.target.index()].push(source);
        self.succs[source.index()].push(edge);
        Ok(())
    }

    /// Removes all edges from `source` to `target` of the given kind.
    pub fn remove_edge(&mut self, source: BlockId, target: BlockId, kind: CfgEdgeKind) {
        let before = self.succs[source.index()].len();
        self.succs[source.index()].retain(|e| !(e.target == target && e.kind == kind));
        let removed = before - self.succs[source.index()].len();
        for _ in 0..removed {
            Self::unlink_pred(&mut self.preds, source, target);
        }
    }

    /// Redirects the first regular edge `source -> from` to `to`, keeping
    /// its position so conditional successor order survives.
    pub fn redirect_edge(&mut self, source: BlockId, from: BlockId, to: BlockId) {
        for edge in &mut self.succs[source.index()] {
            if edge.target == from && edge.kind == CfgEdgeKind::Regular {
                edge.target = to;
                Self::unlink_pred(&mut self.preds, source, from);
                self.preds[to.index()].push(source);
                return;
            }
        }
    }

    /// Rewrites every edge pointing at `from` to point at `to` instead.
    pub fn retarget_edges(&mut self, from: BlockId, to: BlockId) {
        let sources: Vec<BlockId> = self.preds[from.index()].clone();
        for source in sources {
            for edge in &mut self.succs[source.index()] {
                if edge.target == from {
                    edge.target = to;
                    self.preds[to.index()].push(source);
                }
            }
        }
        self.preds[from.index()].clear();
    }

    /// Tombstones a block: clears its instructions and unlinks all its edges.
    pub fn mark_dead(&mut self, id: BlockId) {
        let outgoing: Vec<CfgEdge> = self.succs[id.index()].drain(..).collect();
        for edge in outgoing {
            Self::unlink_pred(&mut self.preds, id, edge.target);
        }
        let incoming: Vec<BlockId> = self.preds[id.index()].clone();
        for source in incoming {
            self.succs[source.index()].retain(|e| e.target != id);
        }
        self.preds[id.index()].clear();
        self.blocks[id.index()].instructions.clear();
        self.blocks[id.index()].dead = true;
        for range in &mut self.ranges {
            range.body.retain(|&b| b != id);
        }
    }

    /// Returns the designated entry block.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        self.entry
    }

    /// Returns the synthetic exit block, once normalization has attached it.
    #[must_use]
    pub const fn exit(&self) -> Option<BlockId> {
        self.exit
    }

    pub(crate) fn set_exit(&mut self, exit: BlockId) {
        self.exit = Some(exit);
    }

    /// Returns the block at `id`.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Returns the block at `id` mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Number of arena slots, including tombstoned blocks.
    #[must_use]
    pub fn arena_len(&self) -> usize {
        self.blocks.len()
    }

    /// Number of live blocks.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.blocks.iter().filter(|b| !b.dead).count()
    }

    /// Iterates over live blocks in ID (instruction) order.
    pub fn live_blocks(&self) -> impl Iterator<Item = &BasicBlock> + '_ {
        self.blocks.iter().filter(|b| !b.dead)
    }

    /// Iterates over live block IDs in instruction order.
    pub fn live_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().filter(|b| !b.dead).map(|b| b.id)
    }

    /// Outgoing edges of a block.
    #[must_use]
    pub fn successors(&self, id: BlockId) -> &[CfgEdge] {
        &self.succs[id.index()]
    }

    /// Regular (non-exception) successor IDs of a block.
    pub fn regular_successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.succs[id.index()]
            .iter()
            .filter(|e| !e.kind.is_exception())
            .map(|e| e.target)
    }

    /// Predecessor IDs of a block (regular and exceptional).
    #[must_use]
    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        &self.preds[id.index()]
    }

    /// All protected ranges, including tombstoned ones.
    #[must_use]
    pub fn ranges(&self) -> &[ProtectedRange] {
        &self.ranges
    }

    /// Live protected ranges.
    pub fn live_ranges(&self) -> impl Iterator<Item = &ProtectedRange> + '_ {
        self.ranges.iter().filter(|r| !r.removed)
    }

    /// Returns the range at `id`.
    #[must_use]
    pub fn range(&self, id: RangeId) -> &ProtectedRange {
        &self.ranges[id.index()]
    }

    /// Returns the range at `id` mutably.
    pub fn range_mut(&mut self, id: RangeId) -> &mut ProtectedRange {
        &mut self.ranges[id.index()]
    }

    /// Live ranges protecting the given block.
    pub fn ranges_protecting(&self, block: BlockId) -> impl Iterator<Item = &ProtectedRange> + '_ {
        self.live_ranges().filter(move |r| r.protects(block))
    }

    /// Computes the set of blocks reachable from the entry over all edges.
    #[must_use]
    pub fn reachable_from_entry(&self) -> HashSet<BlockId> {
        let mut seen = HashSet::new();
        let mut worklist = vec![self.entry];
        while let Some(id) = worklist.pop() {
            if !seen.insert(id) || self.blocks[id.index()].dead {
                continue;
            }
            for edge in &self.succs[id.index()] {
                if !seen.contains(&edge.target) {
                    worklist.push(edge.target);
                }
            }
        }
        seen.retain(|&id| !self.blocks[id.index()].dead);
        seen
    }

    /// Generates a DOT format representation of this control flow graph.
    ///
    /// Entry is highlighted in green, the synthetic exit in red; exception
    /// edges are drawn dashed.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();
        dot.push_str("digraph CFG {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"CFG: {name}\";");
        }
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");

        for block in self.live_blocks() {
            let mut label = format!("{}", block.id);
            if let Some(off) = block.start_offset() {
                let _ = write!(label, " @{off}");
            }
            label.push_str("\\l");
            for instr in &block.instructions {
                let _ = write!(label, "{}: {:?}\\l", instr.offset, instr.opcode);
            }
            let style = if block.id == self.entry {
                ", style=filled, fillcolor=lightgreen"
            } else if Some(block.id) == self.exit {
                ", style=filled, fillcolor=lightcoral"
            } else {
                ""
            };
            let _ = writeln!(dot, "    {} [label=\"{label}\"{style}];", block.id);
        }

        for block in self.live_blocks() {
            for edge in self.successors(block.id) {
                let attrs = match edge.kind {
                    CfgEdgeKind::Regular => String::new(),
                    CfgEdgeKind::Exception { range } => {
                        format!(" [style=dashed, label=\"R{}\"]", range.index())
                    }
                };
                let _ = writeln!(dot, "    {} -> {}{attrs};", block.id, edge.target);
            }
        }

        dot.push_str("}\n");
        dot
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
