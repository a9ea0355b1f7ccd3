//! Dominator tree computation.
//!
//! Implements the Cooper-Harvey-Kennedy iterative algorithm over a reverse
//! postorder numbering of the live blocks. Block A dominates B if every path
//! from the entry to B passes through A; the statement tree parser uses this
//! relation to nest regions.

use crate::cfg::{BlockId, ControlFlowGraph};

/// The dominance relation of a CFG, rooted at the entry block.
///
/// Computed once per parse from the current (possibly mutated) graph; the
/// finally replication loop recomputes it on every re-parse.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator per arena slot; `None` for the entry, dead and
    /// unreachable blocks.
    idom: Vec<Option<BlockId>>,
    /// Reverse postorder of the live, reachable blocks.
    rpo: Vec<BlockId>,
    entry: BlockId,
}

impl DominatorTree {
    /// Computes the dominator tree of `graph` from its entry block.
    ///
    /// Traversal follows all edges, regular and exceptional, so handler
    /// blocks are dominated by the range they protect against.
    #[must_use]
    pub fn compute(graph: &ControlFlowGraph) -> Self {
        let entry = graph.entry();
        let rpo = Self::reverse_postorder(graph, entry);

        let mut order_of = vec![usize::MAX; graph.arena_len()];
        for (order, &id) in rpo.iter().enumerate() {
            order_of[id.index()] = order;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; graph.arena_len()];
        idom[entry.index()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in graph.predecessors(block) {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(&idom, &order_of, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom[block.index()] != Some(new_idom) {
                        idom[block.index()] = Some(new_idom);
                        changed = true;
                    }
                }
            }
        }

        // The entry's self-idom is an algorithm artifact, not a tree edge.
        idom[entry.index()] = None;

        Self { idom, rpo, entry }
    }

    fn intersect(
        idom: &[Option<BlockId>],
        order_of: &[usize],
        a: BlockId,
        b: BlockId,
    ) -> BlockId {
        let mut finger_a = a;
        let mut finger_b = b;
        while finger_a != finger_b {
            while order_of[finger_a.index()] > order_of[finger_b.index()] {
                finger_a = idom[finger_a.index()].unwrap_or(finger_a);
            }
            while order_of[finger_b.index()] > order_of[finger_a.index()] {
                finger_b = idom[finger_b.index()].unwrap_or(finger_b);
            }
        }
        finger_a
    }

    fn reverse_postorder(graph: &ControlFlowGraph, entry: BlockId) -> Vec<BlockId> {
        enum Visit {
            Enter(BlockId),
            Exit(BlockId),
        }

        let mut visited = vec![false; graph.arena_len()];
        let mut postorder = Vec::new();
        let mut stack = vec![Visit::Enter(entry)];
        while let Some(step) = stack.pop() {
            match step {
                Visit::Enter(block) => {
                    if visited[block.index()] || graph.block(block).is_dead() {
                        continue;
                    }
                    visited[block.index()] = true;
                    stack.push(Visit::Exit(block));
                    for edge in graph.successors(block).iter().rev() {
                        if !visited[edge.target.index()] {
                            stack.push(Visit::Enter(edge.target));
                        }
                    }
                }
                Visit::Exit(block) => postorder.push(block),
            }
        }
        postorder.reverse();
        postorder
    }

    /// Immediate dominator of `block`; `None` for the entry and for blocks
    /// unreachable at computation time.
    #[must_use]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    /// Returns `true` if `dominator` dominates `dominated` (reflexive).
    #[must_use]
    pub fn dominates(&self, dominator: BlockId, dominated: BlockId) -> bool {
        let mut current = dominated;
        loop {
            if current == dominator {
                return true;
            }
            match self.idom(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    /// Reverse postorder of the live, reachable blocks.
    #[must_use]
    pub fn reverse_postorder_blocks(&self) -> &[BlockId] {
        &self.rpo
    }

    /// The entry block the tree is rooted at.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        self.entry
    }
}
