//! Finally replication and synchronized-handler collapse.
//!
//! A `finally` body is compiled as a catch-all handler that re-throws the
//! caught exception after running the body. The processor identifies that
//! shape, then splices a copy of the body over every regular exit of the
//! protected region so the normal paths run it too. Each splice invalidates
//! the statement tree, so the pipeline re-parses and calls
//! [`FinallyProcessor::iterate`] again until nothing changes (bounded by
//! [`MAX_FINALLY_ROUNDS`]).
//!
//! `synchronized` blocks use the same catch-all encoding with a
//! monitor-exit in the handler; those are not replicated but collapsed
//! into [`StatementKind::Synchronized`] after the replication loop.

use std::collections::{HashMap, HashSet};

use crate::{
    bytecode::{Instruction, Opcode},
    cfg::{BlockId, CfgEdge, ControlFlowGraph, RangeId},
    stmt::{StatementId, StatementKind, StatementTree},
};

/// Ceiling on parse / replicate rounds before the pipeline gives up with
/// [`Error::FinallyLoopNotConverging`](crate::Error::FinallyLoopNotConverging).
pub const MAX_FINALLY_ROUNDS: usize = 16;

/// Replicates `finally` handler bodies over regular exits, one protected
/// range per round.
#[derive(Debug, Default)]
pub struct FinallyProcessor {
    processed: HashSet<RangeId>,
}

/// The instruction shape of a catch-all handler region.
struct HandlerShape {
    /// Slot the handler stores the caught exception into.
    exception_slot: u16,
    /// Blocks ending in `load slot; athrow`.
    rethrow_blocks: HashSet<BlockId>,
    /// `true` when the body releases a monitor (a `synchronized` guard,
    /// not a `finally`).
    releases_monitor: bool,
}

impl FinallyProcessor {
    /// Creates a processor with an empty processed set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans the current tree for an unprocessed catch-all handler with a
    /// `finally` shape; if one is found, replicates its body over the
    /// protected region's regular exits. Returns `true` when the graph
    /// changed and the tree must be re-parsed.
    pub fn iterate(&mut self, graph: &mut ControlFlowGraph, tree: &StatementTree) -> bool {
        for id in tree.preorder() {
            let StatementKind::TryCatch { .. } = tree.stmt(id).kind else {
                continue;
            };
            let children = tree.stmt(id).children.clone();
            let Some((&try_child, handlers)) = children.split_first() else {
                continue;
            };
            for &handler_child in handlers {
                let Some(range_id) = catch_all_range(graph, tree, handler_child) else {
                    continue;
                };
                if self.processed.contains(&range_id) {
                    continue;
                }

                let handler_blocks = tree.collect_blocks(handler_child);
                let Some(shape) = handler_shape(graph, &handler_blocks) else {
                    self.processed.insert(range_id);
                    continue;
                };
                if shape.releases_monitor {
                    // Synchronized guard; left for collapse_synchronized.
                    self.processed.insert(range_id);
                    continue;
                }

                self.processed.insert(range_id);
                graph.range_mut(range_id).is_finally = true;

                let try_blocks = tree.collect_blocks(try_child);
                if replicate(graph, range_id, &try_blocks, &handler_blocks, &shape) {
                    return true;
                }
            }
        }
        false
    }
}

/// Marks every `TryCatch` statement whose catch-all handler was claimed as
/// a `finally` body. Run once after the replication loop settles.
pub fn mark_finally(graph: &ControlFlowGraph, tree: &mut StatementTree) {
    for id in tree.preorder() {
        let StatementKind::TryCatch { finally: false } = tree.stmt(id).kind else {
            continue;
        };
        let is_finally = tree.stmt(id).children[1..].iter().any(|&h| {
            catch_all_range(graph, tree, h)
                .is_some_and(|r| graph.range(r).is_finally())
        });
        if is_finally {
            tree.stmt_mut(id).kind = StatementKind::TryCatch { finally: true };
        }
    }
}

/// Rewrites `try { body } catch-all { monitorexit; rethrow }` regions into
/// `Synchronized` statements, dropping the compiler-inserted handler.
///
/// The monitor-enter expression stays in the block preceding the region;
/// the finisher renders it as the synchronized head.
pub fn collapse_synchronized(graph: &mut ControlFlowGraph, tree: &mut StatementTree) {
    for id in tree.preorder() {
        let StatementKind::TryCatch { .. } = tree.stmt(id).kind else {
            continue;
        };
        let children = tree.stmt(id).children.clone();
        if children.len() != 2 {
            continue;
        }
        let handler_child = children[1];
        let Some(range_id) = catch_all_range(graph, tree, handler_child) else {
            continue;
        };
        let handler_blocks = tree.collect_blocks(handler_child);
        let Some(shape) = handler_shape(graph, &handler_blocks) else {
            continue;
        };
        if !shape.releases_monitor {
            continue;
        }

        graph.remove_range(range_id);
        for block in handler_blocks {
            graph.mark_dead(block);
        }
        dissolve_subtree(tree, handler_child);
        tree.stmt_mut(id).kind = StatementKind::Synchronized;
    }
}

fn dissolve_subtree(tree: &mut StatementTree, id: StatementId) {
    for child in tree.stmt(id).children.clone() {
        dissolve_subtree(tree, child);
    }
    tree.dissolve(id);
}

/// Finds the live catch-all range whose handler is this statement's entry.
fn catch_all_range(
    graph: &ControlFlowGraph,
    tree: &StatementTree,
    handler_child: StatementId,
) -> Option<RangeId> {
    let entry = tree.stmt(handler_child).entry_block?;
    graph
        .live_ranges()
        .find(|r| r.handler == entry && r.is_catch_all())
        .map(|r| r.id)
}

/// Recognizes the `store exc; ...; load exc; athrow` handler shape. The
/// first handler block must open with the exception store and at least one
/// block must re-throw the stored exception.
fn handler_shape(graph: &ControlFlowGraph, handler_blocks: &[BlockId]) -> Option<HandlerShape> {
    let first = handler_blocks.first()?;
    let entry_instrs = &graph.block(*first).instructions;
    let Some(Opcode::Store { slot }) = entry_instrs.first().map(|i| &i.opcode) else {
        return None;
    };
    let exception_slot = *slot;

    let mut rethrow_blocks = HashSet::new();
    let mut releases_monitor = false;
    for &block in handler_blocks {
        let instrs = &graph.block(block).instructions;
        if instrs
            .iter()
            .any(|i| matches!(i.opcode, Opcode::MonitorExit))
        {
            releases_monitor = true;
        }
        if instrs.len() >= 2
            && matches!(instrs[instrs.len() - 2].opcode, Opcode::Load { slot } if slot == exception_slot)
            && matches!(instrs[instrs.len() - 1].opcode, Opcode::Athrow)
        {
            rethrow_blocks.insert(block);
        }
    }
    if rethrow_blocks.is_empty() {
        return None;
    }
    Some(HandlerShape {
        exception_slot,
        rethrow_blocks,
        releases_monitor,
    })
}

/// Splices a copy of the handler body (store and rethrow stripped) over
/// every regular exit edge of the protected region. Each exit gets its own
/// copy. Returns `true` if any edge was rewired.
fn replicate(
    graph: &mut ControlFlowGraph,
    range_id: RangeId,
    try_blocks: &[BlockId],
    handler_blocks: &[BlockId],
    shape: &HandlerShape,
) -> bool {
    let try_set: HashSet<BlockId> = try_blocks.iter().copied().collect();
    let handler_set: HashSet<BlockId> = handler_blocks.iter().copied().collect();

    let mut exit_edges: Vec<(BlockId, BlockId)> = Vec::new();
    for &u in try_blocks {
        for t in graph.regular_successors(u).collect::<Vec<_>>() {
            if !try_set.contains(&t) && !handler_set.contains(&t) {
                exit_edges.push((u, t));
            }
        }
    }

    // Single-block body with nothing between store and rethrow: the finally
    // body is empty, keep the edges as they are.
    if handler_blocks.len() == 1 && graph.block(handler_blocks[0]).instructions.len() <= 3 {
        return false;
    }

    let mut changed = false;
    for (u, t) in exit_edges {
        let Some(entry_clone) = clone_region(graph, range_id, handler_blocks, shape, u, t) else {
            continue;
        };
        graph.redirect_edge(u, t, entry_clone);
        changed = true;
    }
    changed
}

/// Clones the handler region for one exit edge, stripping the exception
/// store from the entry and the rethrow tail from exit blocks. Rethrow
/// clones fall out to `target` instead. Returns the clone of the entry
/// block.
fn clone_region(
    graph: &mut ControlFlowGraph,
    range_id: RangeId,
    handler_blocks: &[BlockId],
    shape: &HandlerShape,
    insertion: BlockId,
    target: BlockId,
) -> Option<BlockId> {
    let entry = *handler_blocks.first()?;

    let mut mapping: HashMap<BlockId, BlockId> = HashMap::new();
    for &old in handler_blocks {
        let mut instrs: Vec<Instruction> = graph.block(old).instructions.clone();
        if old == entry {
            instrs.remove(0);
        }
        if shape.rethrow_blocks.contains(&old) {
            instrs.truncate(instrs.len().saturating_sub(2));
        }
        let clone = graph.add_block(instrs);
        mapping.insert(old, clone);
    }

    // Internal edges are cloned; a rethrow clone falls out to the target
    // instead of re-throwing.
    let mut pending: Vec<(BlockId, CfgEdge)> = Vec::new();
    for &old in handler_blocks {
        let clone = mapping[&old];
        if shape.rethrow_blocks.contains(&old) {
            pending.push((clone, CfgEdge::regular(target)));
            continue;
        }
        for t in graph.regular_successors(old).collect::<Vec<_>>() {
            let mapped = mapping.get(&t).copied().unwrap_or(t);
            pending.push((clone, CfgEdge::regular(mapped)));
        }
    }

    // The copies run at the insertion point, so they inherit whatever
    // outer protection covers it.
    let outer: Vec<RangeId> = graph
        .ranges_protecting(insertion)
        .filter(|r| r.id != range_id)
        .map(|r| r.id)
        .collect();
    for r in outer {
        let handler = graph.range(r).handler;
        for &clone in mapping.values() {
            graph.range_mut(r).body.push(clone);
            pending.push((clone, CfgEdge::exception(handler, r)));
        }
    }

    for (source, edge) in pending {
        // Clones reference blocks already in the arena.
        let _ = graph.add_edge(source, edge);
    }
    mapping.get(&entry).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ConstValue, ExceptionEntry, Instruction, MethodCode, MethodFlags, MethodId},
        cfg::{builder, normalize},
        stmt::dom_parser,
    };

    fn prepare(instructions: Vec<Instruction>, exceptions: Vec<ExceptionEntry>) -> ControlFlowGraph {
        let mut code = MethodCode::new(
            MethodId::new("Test", "m", "()V"),
            MethodFlags::PUBLIC,
            instructions,
        );
        code.exceptions = exceptions;
        let mut graph = builder::build_graph(&code).unwrap();
        normalize::remove_dead_blocks(&mut graph);
        normalize::connect_exit(&mut graph).unwrap();
        graph
    }

    fn finally_bytecode() -> (Vec<Instruction>, Vec<ExceptionEntry>) {
        // try { v0 = 1 } finally { v1 = 2 }
        //
        //  0: iconst 1      4: iconst 2
        //  1: istore 0      5: istore 1
        //  2: goto 8        6: aload 2
        //  3: astore 2      7: athrow
        //                   8: return
        let instructions = vec![
            Instruction::new(0, Opcode::Const(ConstValue::Int(1))),
            Instruction::new(1, Opcode::Store { slot: 0 }),
            Instruction::new(2, Opcode::Goto { target: 8 }),
            Instruction::new(3, Opcode::Store { slot: 2 }),
            Instruction::new(4, Opcode::Const(ConstValue::Int(2))),
            Instruction::new(5, Opcode::Store { slot: 1 }),
            Instruction::new(6, Opcode::Load { slot: 2 }),
            Instruction::new(7, Opcode::Athrow),
            Instruction::new(8, Opcode::Return { with_value: false }),
        ];
        let exceptions = vec![ExceptionEntry {
            start: 0,
            end: 3,
            handler: 3,
            exception_type: None,
        }];
        (instructions, exceptions)
    }

    #[test]
    fn finally_body_is_copied_onto_the_normal_path() {
        let (instructions, exceptions) = finally_bytecode();
        let mut graph = prepare(instructions, exceptions);

        let mut processor = FinallyProcessor::new();
        let tree = dom_parser::parse(&graph);
        assert!(processor.iterate(&mut graph, &tree));
        let tree = dom_parser::parse(&graph);
        assert!(!processor.iterate(&mut graph, &tree));

        // The body assignment now exists twice: handler + spliced copy.
        let stores: usize = graph
            .live_blocks()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i.opcode, Opcode::Store { slot: 1 }))
            .count();
        assert_eq!(stores, 2);
        assert!(graph.live_ranges().any(|r| r.is_finally()));
    }

    #[test]
    fn claimed_range_marks_try_catch_as_finally() {
        let (instructions, exceptions) = finally_bytecode();
        let mut graph = prepare(instructions, exceptions);

        let mut processor = FinallyProcessor::new();
        loop {
            let tree = dom_parser::parse(&graph);
            if !processor.iterate(&mut graph, &tree) {
                break;
            }
        }
        let mut tree = dom_parser::parse(&graph);
        mark_finally(&graph, &mut tree);

        assert!(tree.preorder().into_iter().any(|id| matches!(
            tree.stmt(id).kind,
            StatementKind::TryCatch { finally: true }
        )));
    }

    #[test]
    fn typed_handler_is_not_a_finally() {
        let (instructions, mut exceptions) = finally_bytecode();
        exceptions[0].exception_type = Some("java/lang/Exception".into());
        let mut graph = prepare(instructions, exceptions);

        let mut processor = FinallyProcessor::new();
        let tree = dom_parser::parse(&graph);
        assert!(!processor.iterate(&mut graph, &tree));
        assert!(graph.live_ranges().all(|r| !r.is_finally()));
    }

    #[test]
    fn monitor_handler_collapses_to_synchronized() {
        // synchronized (v1) { v0 = 1 }
        //
        //  0: aload 1        7: astore 3
        //  1: monitorenter   8: aload 1
        //  2: iconst 1       9: monitorexit
        //  3: istore 0      10: aload 3
        //  4: aload 1       11: athrow
        //  5: monitorexit   12: return
        //  6: goto 12
        let instructions = vec![
            Instruction::new(0, Opcode::Load { slot: 1 }),
            Instruction::new(1, Opcode::MonitorEnter),
            Instruction::new(2, Opcode::Const(ConstValue::Int(1))),
            Instruction::new(3, Opcode::Store { slot: 0 }),
            Instruction::new(4, Opcode::Load { slot: 1 }),
            Instruction::new(5, Opcode::MonitorExit),
            Instruction::new(6, Opcode::Goto { target: 12 }),
            Instruction::new(7, Opcode::Store { slot: 3 }),
            Instruction::new(8, Opcode::Load { slot: 1 }),
            Instruction::new(9, Opcode::MonitorExit),
            Instruction::new(10, Opcode::Load { slot: 3 }),
            Instruction::new(11, Opcode::Athrow),
            Instruction::new(12, Opcode::Return { with_value: false }),
        ];
        let exceptions = vec![ExceptionEntry {
            start: 2,
            end: 7,
            handler: 7,
            exception_type: None,
        }];
        let mut graph = prepare(instructions, exceptions);

        // The replication loop must leave the monitor guard alone.
        let mut processor = FinallyProcessor::new();
        let tree = dom_parser::parse(&graph);
        assert!(!processor.iterate(&mut graph, &tree));

        let mut tree = dom_parser::parse(&graph);
        collapse_synchronized(&mut graph, &mut tree);

        assert!(tree.preorder().into_iter().any(|id| matches!(
            tree.stmt(id).kind,
            StatementKind::Synchronized
        )));
        assert!(graph.live_ranges().next().is_none());
    }
}
