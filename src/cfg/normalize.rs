//! Graph normalization passes.
//!
//! Applied in pipeline order, each idempotent once the graph is
//! dead-code-free:
//!
//! 1. [`remove_dead_blocks`] - drop blocks unreachable from the entry
//! 2. [`inline_jsr`] - duplicate subroutine bodies along each `jsr` call site
//! 3. [`connect_exit`] - attach the single synthetic exit block
//! 4. [`remove_gotos`] - bypass blocks that only jump, strip trailing gotos
//! 5. [`incorporate_value_returns`] - merge lone returns into predecessors
//!    (gated by the `no_exceptions_return` option)
//! 6. [`merge_blocks`] - collapse trivially-chained blocks
//!
//! Merging always proceeds in instruction (block ID) order so the block
//! numbering stays deterministic.

use std::collections::{HashMap, HashSet};

use crate::{
    bytecode::{Instruction, Opcode},
    cfg::{BlockId, CfgEdge, CfgEdgeKind, ControlFlowGraph},
    Result,
};

/// Upper bound on nested `jsr` inlining rounds. Deeper nesting than this is
/// recursive subroutine obfuscation; the remainder is left untouched.
const MAX_JSR_ROUNDS: usize = 8;

/// Removes every block unreachable from the entry, and tombstones protected
/// ranges whose handler or body died with them.
pub fn remove_dead_blocks(graph: &mut ControlFlowGraph) {
    let reachable = graph.reachable_from_entry();
    let dead: Vec<BlockId> = graph.live_ids().filter(|id| !reachable.contains(id)).collect();
    for id in dead {
        graph.mark_dead(id);
    }

    let doomed: Vec<_> = graph
        .live_ranges()
        .filter(|r| graph.block(r.handler).is_dead() || r.body.is_empty())
        .map(|r| r.id)
        .collect();
    for range in doomed {
        graph.remove_range(range);
    }
}

/// Inlines `jsr`/`ret` subroutine constructs by duplicating the subroutine
/// body at each call site. Skips methods with no remaining `jsr`.
///
/// The duplicated entry block loses its return-address store and the
/// duplicated `ret` block loses its `ret`, receiving a regular edge to the
/// call site's continuation instead.
///
/// # Errors
///
/// Returns [`Error::GraphError`](crate::Error::GraphError) if a `jsr` has no
/// continuation block to return to.
pub fn inline_jsr(graph: &mut ControlFlowGraph) -> Result<()> {
    for _ in 0..MAX_JSR_ROUNDS {
        let Some(call_site) = graph.live_ids().find(|&id| {
            matches!(
                graph.block(id).terminator().map(|i| &i.opcode),
                Some(Opcode::Jsr { .. })
            )
        }) else {
            return Ok(());
        };
        inline_one_jsr(graph, call_site)?;
        remove_dead_blocks(graph);
    }
    Ok(())
}

fn inline_one_jsr(graph: &mut ControlFlowGraph, call_site: BlockId) -> Result<()> {
    // Successor order: the jsr target edge was added first, the fall-through
    // continuation second.
    let succs: Vec<BlockId> = graph.regular_successors(call_site).collect();
    let sub_entry = *succs.first().ok_or_else(|| {
        crate::Error::GraphError(format!("jsr block {call_site} has no subroutine edge"))
    })?;
    let continuation = succs.get(1).copied().ok_or_else(|| {
        crate::Error::GraphError(format!("jsr block {call_site} has no continuation"))
    })?;

    // Collect the subroutine body: regular-edge closure from its entry,
    // not expanding past ret blocks.
    let mut body: Vec<BlockId> = Vec::new();
    let mut seen: HashSet<BlockId> = HashSet::new();
    let mut worklist = vec![sub_entry];
    while let Some(id) = worklist.pop() {
        if !seen.insert(id) {
            continue;
        }
        body.push(id);
        let ends_in_ret = matches!(
            graph.block(id).terminator().map(|i| &i.opcode),
            Some(Opcode::Ret { .. })
        );
        if !ends_in_ret {
            for succ in graph.regular_successors(id).collect::<Vec<_>>() {
                if !seen.contains(&succ) {
                    worklist.push(succ);
                }
            }
        }
    }
    body.sort();

    // Clone each body block, dropping the return-address store at the
    // subroutine entry and the trailing ret.
    let mut clone_of: HashMap<BlockId, BlockId> = HashMap::new();
    for &original in &body {
        let mut instructions: Vec<Instruction> = graph.block(original).instructions.clone();
        if original == sub_entry {
            if let Some(Opcode::Store { .. }) = instructions.first().map(|i| &i.opcode) {
                instructions.remove(0);
            }
        }
        if let Some(Opcode::Ret { .. }) = instructions.last().map(|i| &i.opcode) {
            instructions.pop();
        }
        let clone = graph.add_block(instructions);
        clone_of.insert(original, clone);
    }

    // Internal edges, exception coverage, and the return edge.
    for &original in &body {
        let clone = clone_of[&original];
        let edges: Vec<CfgEdge> = graph.successors(original).to_vec();
        let ends_in_ret = matches!(
            graph.block(original).terminator().map(|i| &i.opcode),
            Some(Opcode::Ret { .. })
        );
        for edge in edges {
            match edge.kind {
                CfgEdgeKind::Regular => {
                    if ends_in_ret {
                        continue;
                    }
                    let target = clone_of.get(&edge.target).copied().unwrap_or(edge.target);
                    graph.add_edge(clone, CfgEdge::regular(target))?;
                }
                CfgEdgeKind::Exception { range } => {
                    let handler = graph.range(range).handler;
                    graph.range_mut(range).body.push(clone);
                    graph.add_edge(clone, CfgEdge::exception(handler, range))?;
                }
            }
        }
        if ends_in_ret {
            graph.add_edge(clone, CfgEdge::regular(continuation))?;
        }
    }

    // Rewire the call site: drop the jsr instruction and both its edges,
    // then fall through into the cloned entry.
    graph.block_mut(call_site).instructions.pop();
    graph.remove_edge(call_site, sub_entry, CfgEdgeKind::Regular);
    graph.remove_edge(call_site, continuation, CfgEdgeKind::Regular);
    graph.add_edge(call_site, CfgEdge::regular(clone_of[&sub_entry]))?;
    Ok(())
}

/// Appends the single synthetic exit block, with an edge from every live
/// block that performs an unconditional exit or has no successors.
///
/// After this pass the exit is reachable, directly or transitively, from
/// every non-dead block.
pub fn connect_exit(graph: &mut ControlFlowGraph) -> Result<()> {
    let exit = graph.add_block(vec![]);
    graph.set_exit(exit);
    let sources: Vec<BlockId> = graph
        .live_ids()
        .filter(|&id| {
            id != exit
                && (graph.successors(id).iter().all(|e| e.kind.is_exception())
                    || graph.block(id).terminator().is_some_and(Instruction::is_exit))
        })
        .collect();
    for source in sources {
        graph.add_edge(source, CfgEdge::regular(exit))?;
    }
    Ok(())
}

/// Removes blocks containing only an unconditional jump, rewriting their
/// incoming edges to bypass them, then strips trailing `goto` instructions
/// (flow they encoded is carried by edges from here on).
pub fn remove_gotos(graph: &mut ControlFlowGraph) {
    let mut changed = true;
    while changed {
        changed = false;
        for id in graph.live_ids().collect::<Vec<_>>() {
            if id == graph.entry() || Some(id) == graph.exit() {
                continue;
            }
            let block = graph.block(id);
            let only_goto = block.instructions.len() == 1
                && matches!(block.instructions[0].opcode, Opcode::Goto { .. });
            if !only_goto {
                continue;
            }
            let targets: Vec<BlockId> = graph.regular_successors(id).collect();
            // A goto-only block has exactly one regular successor.
            let [target] = targets[..] else { continue };
            if target == id {
                continue;
            }
            graph.retarget_edges(id, target);
            graph.mark_dead(id);
            changed = true;
        }
    }

    for id in graph.live_ids().collect::<Vec<_>>() {
        let block = graph.block_mut(id);
        if let Some(Opcode::Goto { .. }) = block.instructions.last().map(|i| &i.opcode) {
            block.instructions.pop();
        }
    }
}

/// Special case behind the `no_exceptions_return` option: a lone return
/// block outside any protected range is copied back into each predecessor
/// that unconditionally reaches it, so exit handling sees one return per
/// path instead of a shared join.
pub fn incorporate_value_returns(graph: &mut ControlFlowGraph) -> Result<()> {
    for id in graph.live_ids().collect::<Vec<_>>() {
        if Some(id) == graph.exit() || id == graph.entry() {
            continue;
        }
        if graph.ranges_protecting(id).next().is_some() {
            continue;
        }
        if !is_plain_return(graph, id) {
            continue;
        }
        let exit = match graph.exit() {
            Some(exit) => exit,
            None => continue,
        };

        let preds: Vec<BlockId> = graph.predecessors(id).to_vec();
        for pred in preds {
            if pred == id {
                continue;
            }
            let unconditional = graph.regular_successors(pred).collect::<Vec<_>>() == [id]
                && graph
                    .successors(pred)
                    .iter()
                    .any(|e| e.target == id && e.kind == CfgEdgeKind::Regular);
            if !unconditional {
                continue;
            }
            let copied = graph.block(id).instructions.clone();
            graph.block_mut(pred).instructions.extend(copied);
            graph.remove_edge(pred, id, CfgEdgeKind::Regular);
            graph.add_edge(pred, CfgEdge::regular(exit))?;
        }
        if graph.predecessors(id).is_empty() {
            graph.mark_dead(id);
        }
    }
    Ok(())
}

fn is_plain_return(graph: &ControlFlowGraph, id: BlockId) -> bool {
    let instructions = &graph.block(id).instructions;
    match instructions.len() {
        1 => matches!(instructions[0].opcode, Opcode::Return { .. }),
        2 => {
            matches!(instructions[0].opcode, Opcode::Load { .. })
                && matches!(instructions[1].opcode, Opcode::Return { .. })
        }
        _ => false,
    }
}

/// Merges consecutive blocks connected by a single unconditional edge where
/// the target has no other incoming edges. Merging proceeds in instruction
/// order so the surviving block numbering is deterministic.
pub fn merge_blocks(graph: &mut ControlFlowGraph) -> Result<()> {
    let mut changed = true;
    while changed {
        changed = false;
        for id in graph.live_ids().collect::<Vec<_>>() {
            if graph.block(id).is_dead() {
                continue;
            }
            let regular: Vec<BlockId> = graph.regular_successors(id).collect();
            let [next] = regular[..] else { continue };
            if next == id
                || next == graph.entry()
                || Some(next) == graph.exit()
                || graph.predecessors(next).len() != 1
            {
                continue;
            }
            if !same_protection(graph, id, next) {
                continue;
            }

            let moved_instructions = graph.block(next).instructions.clone();
            let moved_edges: Vec<CfgEdge> = graph.successors(next).to_vec();
            let existing: Vec<CfgEdge> = graph.successors(id).to_vec();
            graph.mark_dead(next);
            graph.block_mut(id).instructions.extend(moved_instructions);
            graph.remove_edge(id, next, CfgEdgeKind::Regular);
            for edge in moved_edges {
                // Exception edges for shared ranges already exist on the head.
                if edge.kind.is_exception() && existing.contains(&edge) {
                    continue;
                }
                if edge.target == next {
                    continue;
                }
                graph.add_edge(id, edge)?;
            }
            changed = true;
        }
    }
    Ok(())
}

fn same_protection(graph: &ControlFlowGraph, a: BlockId, b: BlockId) -> bool {
    let of = |id: BlockId| {
        let mut ids: Vec<_> = graph.ranges_protecting(id).map(|r| r.id).collect();
        ids.sort();
        ids
    };
    of(a) == of(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ConstValue, Instruction, Opcode};

    fn terminated(graph: &mut ControlFlowGraph, opcode: Opcode) -> BlockId {
        graph.add_block(vec![Instruction::new(0, opcode)])
    }

    #[test]
    fn unreachable_blocks_are_removed() {
        let mut graph = ControlFlowGraph::new();
        let a = graph.add_block(vec![]);
        let b = graph.add_block(vec![]);
        let orphan = graph.add_block(vec![]);
        graph.add_edge(a, CfgEdge::regular(b)).unwrap();

        remove_dead_blocks(&mut graph);

        assert!(!graph.block(a).is_dead());
        assert!(!graph.block(b).is_dead());
        assert!(graph.block(orphan).is_dead());
    }

    #[test]
    fn exit_reachable_from_every_live_block() {
        let mut graph = ControlFlowGraph::new();
        let a = graph.add_block(vec![]);
        let b = terminated(&mut graph, Opcode::Return { with_value: false });
        graph.add_edge(a, CfgEdge::regular(b)).unwrap();

        connect_exit(&mut graph).unwrap();

        let exit = graph.exit().unwrap();
        assert_eq!(graph.predecessors(exit), &[b]);
        // Exit must be transitively reachable from the entry.
        assert!(graph.reachable_from_entry().contains(&exit));
    }

    #[test]
    fn goto_only_block_is_bypassed() {
        let mut graph = ControlFlowGraph::new();
        let a = graph.add_block(vec![Instruction::new(0, Opcode::Nop)]);
        let hop = terminated(&mut graph, Opcode::Goto { target: 8 });
        let c = terminated(&mut graph, Opcode::Return { with_value: false });
        graph.add_edge(a, CfgEdge::regular(hop)).unwrap();
        graph.add_edge(hop, CfgEdge::regular(c)).unwrap();

        remove_gotos(&mut graph);

        assert!(graph.block(hop).is_dead());
        assert_eq!(graph.regular_successors(a).collect::<Vec<_>>(), vec![c]);
    }

    #[test]
    fn trivial_chain_merges_in_order() {
        let mut graph = ControlFlowGraph::new();
        let a = graph.add_block(vec![Instruction::new(0, Opcode::Const(ConstValue::Int(1)))]);
        let b = graph.add_block(vec![Instruction::new(1, Opcode::Store { slot: 0 })]);
        let c = graph.add_block(vec![Instruction::new(
            2,
            Opcode::Return { with_value: false },
        )]);
        graph.add_edge(a, CfgEdge::regular(b)).unwrap();
        graph.add_edge(b, CfgEdge::regular(c)).unwrap();

        merge_blocks(&mut graph).unwrap();

        assert_eq!(graph.live_count(), 1);
        assert_eq!(graph.block(a).instructions.len(), 3);
    }

    #[test]
    fn merge_stops_at_join_points() {
        // a and b both reach join; join must not merge into either.
        let mut graph = ControlFlowGraph::new();
        let a = graph.add_block(vec![Instruction::new(0, Opcode::Nop)]);
        let b = graph.add_block(vec![Instruction::new(1, Opcode::Nop)]);
        let join = terminated(&mut graph, Opcode::Return { with_value: false });
        graph.add_edge(a, CfgEdge::regular(join)).unwrap();
        graph.add_edge(b, CfgEdge::regular(join)).unwrap();

        merge_blocks(&mut graph).unwrap();

        assert_eq!(graph.live_count(), 3);
    }

    #[test]
    fn jsr_body_is_duplicated_at_call_site() {
        // entry: jsr -> sub, falls through to cont
        // sub:   store ret-addr, nop, ret
        // cont:  return
        let mut graph = ControlFlowGraph::new();
        let entry = graph.add_block(vec![Instruction::new(0, Opcode::Jsr { target: 10 })]);
        let cont = graph.add_block(vec![Instruction::new(
            3,
            Opcode::Return { with_value: false },
        )]);
        let sub = graph.add_block(vec![
            Instruction::new(10, Opcode::Store { slot: 3 }),
            Instruction::new(11, Opcode::Nop),
            Instruction::new(12, Opcode::Ret { slot: 3 }),
        ]);
        graph.add_edge(entry, CfgEdge::regular(sub)).unwrap();
        graph.add_edge(entry, CfgEdge::regular(cont)).unwrap();

        inline_jsr(&mut graph).unwrap();

        // The original subroutine is dead, a clone without store/ret remains.
        assert!(graph.block(sub).is_dead());
        let clone = graph.regular_successors(entry).next().unwrap();
        assert_eq!(graph.block(clone).instructions.len(), 1);
        assert!(matches!(
            graph.block(clone).instructions[0].opcode,
            Opcode::Nop
        ));
        assert_eq!(graph.regular_successors(clone).collect::<Vec<_>>(), vec![cont]);
        // The jsr instruction itself is gone.
        assert!(graph.block(entry).instructions.is_empty());
    }

    #[test]
    fn lone_return_is_incorporated_into_predecessors() {
        let mut graph = ControlFlowGraph::new();
        let a = graph.add_block(vec![Instruction::new(0, Opcode::Nop)]);
        let b = graph.add_block(vec![Instruction::new(1, Opcode::Nop)]);
        let ret = graph.add_block(vec![
            Instruction::new(2, Opcode::Load { slot: 0 }),
            Instruction::new(3, Opcode::Return { with_value: true }),
        ]);
        graph.add_edge(a, CfgEdge::regular(ret)).unwrap();
        graph.add_edge(b, CfgEdge::regular(ret)).unwrap();
        connect_exit(&mut graph).unwrap();

        incorporate_value_returns(&mut graph).unwrap();

        assert!(graph.block(ret).is_dead());
        assert_eq!(graph.block(a).instructions.len(), 3);
        assert_eq!(graph.block(b).instructions.len(), 3);
        let exit = graph.exit().unwrap();
        assert!(graph.regular_successors(a).any(|s| s == exit));
    }
}
