//! Exception-range deobfuscation.
//!
//! Applied between graph normalization and block merging, in order:
//! circular-range truncation, pop-range restoration, empty-range removal
//! (option gated), empty handler insertion. Afterwards
//! [`has_obfuscated_layout`] reports whether irreparable shapes remain;
//! the pipeline emits a warning and continues best-effort.

use std::collections::HashSet;

use crate::{
    bytecode::Opcode,
    cfg::{BlockId, CfgEdge, CfgEdgeKind, ControlFlowGraph, RangeId},
};

/// Truncates ranges that protect an exception handler they themselves can
/// reach: a range whose body contains its own handler, or the handler of
/// a range that in turn protects this one. The body is cut at the first
/// offending block so the remaining prefix stays usable.
pub fn remove_circular_ranges(graph: &mut ControlFlowGraph) {
    loop {
        let mut truncation: Option<(RangeId, usize)> = None;

        'outer: for range in graph.live_ranges() {
            for (pos, &block) in range.body.iter().enumerate() {
                if block == range.handler {
                    truncation = Some((range.id, pos));
                    break 'outer;
                }
                // Mutual protection: this range shields another handler
                // whose range shields ours.
                let mutual = graph.live_ranges().any(|other| {
                    other.id != range.id
                        && other.handler == block
                        && other.body.contains(&range.handler)
                });
                if mutual {
                    truncation = Some((range.id, pos));
                    break 'outer;
                }
            }
        }

        let Some((id, pos)) = truncation else {
            return;
        };
        truncate_range(graph, id, pos);
    }
}

fn truncate_range(graph: &mut ControlFlowGraph, id: RangeId, pos: usize) {
    let removed: Vec<BlockId> = graph.range(id).body[pos..].to_vec();
    let handler = graph.range(id).handler;
    graph.range_mut(id).body.truncate(pos);
    for block in removed {
        graph.remove_edge(block, handler, CfgEdgeKind::Exception { range: id });
    }
    if graph.range(id).body.is_empty() {
        graph.remove_range(id);
    }
}

/// Synthesizes ranges for dangling pop handlers.
///
/// An obfuscated table can drop the entry for a handler that merely pops
/// the exception and continues; the handler code survives as an orphan
/// block opening with `pop`. The range is reconstructed over everything
/// preceding the pop site, with the pop site as the range end.
pub fn restore_pop_ranges(graph: &mut ControlFlowGraph) {
    let orphans: Vec<BlockId> = graph
        .live_blocks()
        .filter(|b| {
            b.id != graph.entry()
                && Some(b.id) != graph.exit()
                && graph.predecessors(b.id).is_empty()
                && matches!(b.instructions.first().map(|i| &i.opcode), Some(Opcode::Pop))
        })
        .map(|b| b.id)
        .collect();

    for handler in orphans {
        let body: Vec<BlockId> = graph
            .live_ids()
            .filter(|&b| b.index() < handler.index() && Some(b) != graph.exit())
            .collect();
        if body.is_empty() {
            continue;
        }
        let range = graph.add_range(body.clone(), handler, None);
        for block in body {
            // Both endpoints are live arena blocks.
            let _ = graph.add_edge(block, CfgEdge::exception(handler, range));
        }
    }
}

/// Drops ranges whose body carries no instructions after normalization.
/// Gated by the `remove_empty_ranges` option.
pub fn remove_empty_ranges(graph: &mut ControlFlowGraph) {
    let empty: Vec<RangeId> = graph
        .live_ranges()
        .filter(|r| {
            r.body
                .iter()
                .all(|&b| graph.block(b).instructions.is_empty())
        })
        .map(|r| r.id)
        .collect();
    for id in empty {
        graph.remove_range(id);
    }
}

/// Gives every range a dedicated handler entry block.
///
/// A handler shared between ranges, or one also entered through regular
/// control flow, has no unique statement anchor; an empty block is
/// inserted in front and the range's exception edges are retargeted at
/// it.
pub fn insert_empty_handlers(graph: &mut ControlFlowGraph) {
    let mut seen_handlers: HashSet<BlockId> = HashSet::new();
    let ids: Vec<RangeId> = graph.live_ranges().map(|r| r.id).collect();

    for id in ids {
        let handler = graph.range(id).handler;
        let needs_anchor = has_regular_entry(graph, handler) || !seen_handlers.insert(handler);
        if !needs_anchor {
            continue;
        }

        let anchor = graph.add_block(Vec::new());
        // New block, existing handler: both ends are in the arena.
        let _ = graph.add_edge(anchor, CfgEdge::regular(handler));
        let body = graph.range(id).body.clone();
        for block in body {
            graph.remove_edge(block, handler, CfgEdgeKind::Exception { range: id });
            let _ = graph.add_edge(block, CfgEdge::exception(anchor, id));
        }
        graph.range_mut(id).handler = anchor;
    }
}

fn has_regular_entry(graph: &ControlFlowGraph, handler: BlockId) -> bool {
    graph.predecessors(handler).iter().any(|&p| {
        graph
            .successors(p)
            .iter()
            .any(|e| e.target == handler && e.kind == CfgEdgeKind::Regular)
    })
}

/// Reports whether exception shapes the repairs could not fix remain:
/// a handler still reachable through a regular edge, or a range still
/// protecting its own handler.
#[must_use]
pub fn has_obfuscated_layout(graph: &ControlFlowGraph) -> bool {
    graph
        .live_ranges()
        .any(|r| r.body.contains(&r.handler) || has_regular_entry(graph, r.handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;

    fn make_blocks(graph: &mut ControlFlowGraph, n: usize) -> Vec<BlockId> {
        (0..n)
            .map(|i| graph.add_block(vec![Instruction::new(i as u32, Opcode::Nop)]))
            .collect()
    }

    #[test]
    fn self_protecting_range_is_truncated() {
        let mut graph = ControlFlowGraph::new();
        let b = make_blocks(&mut graph, 3);
        // Range protects [b0, b1=handler, b2]; must shrink to [b0].
        let range = graph.add_range(vec![b[0], b[1], b[2]], b[1], None);
        for &block in &b {
            graph.add_edge(block, CfgEdge::exception(b[1], range)).unwrap();
        }

        remove_circular_ranges(&mut graph);

        assert_eq!(graph.range(range).body, vec![b[0]]);
        assert!(!graph.range(range).is_removed());
        assert!(!has_obfuscated_layout(&graph));
    }

    #[test]
    fn fully_circular_range_is_dropped() {
        let mut graph = ControlFlowGraph::new();
        let b = make_blocks(&mut graph, 2);
        // The handler is the first body block; nothing survives truncation.
        let range = graph.add_range(vec![b[1]], b[1], None);
        graph.add_edge(b[1], CfgEdge::exception(b[1], range)).unwrap();

        remove_circular_ranges(&mut graph);

        assert!(graph.range(range).is_removed());
    }

    #[test]
    fn orphan_pop_block_gets_a_range() {
        let mut graph = ControlFlowGraph::new();
        let entry = graph.add_block(vec![Instruction::new(0, Opcode::Nop)]);
        let pop = graph.add_block(vec![
            Instruction::new(1, Opcode::Pop),
            Instruction::new(2, Opcode::Return { with_value: false }),
        ]);
        assert_eq!(entry, graph.entry());

        restore_pop_ranges(&mut graph);

        let ranges: Vec<_> = graph.live_ranges().collect();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].handler, pop);
        assert_eq!(ranges[0].body, vec![entry]);
        assert!(!graph.predecessors(pop).is_empty());
    }

    #[test]
    fn empty_range_is_removed() {
        let mut graph = ControlFlowGraph::new();
        let body = graph.add_block(Vec::new());
        let handler = graph.add_block(vec![Instruction::new(0, Opcode::Pop)]);
        let range = graph.add_range(vec![body], handler, None);
        graph.add_edge(body, CfgEdge::exception(handler, range)).unwrap();

        remove_empty_ranges(&mut graph);

        assert!(graph.range(range).is_removed());
        assert!(graph.successors(body).is_empty());
    }

    #[test]
    fn shared_handler_gets_dedicated_anchors() {
        let mut graph = ControlFlowGraph::new();
        let b = make_blocks(&mut graph, 3);
        let r1 = graph.add_range(vec![b[0]], b[2], None);
        let r2 = graph.add_range(vec![b[1]], b[2], Some("java/lang/Exception".into()));
        graph.add_edge(b[0], CfgEdge::exception(b[2], r1)).unwrap();
        graph.add_edge(b[1], CfgEdge::exception(b[2], r2)).unwrap();

        insert_empty_handlers(&mut graph);

        // The second range was re-anchored onto a fresh empty block.
        assert_eq!(graph.range(r1).handler, b[2]);
        assert_ne!(graph.range(r2).handler, b[2]);
        let anchor = graph.range(r2).handler;
        assert!(graph.block(anchor).instructions.is_empty());
        assert_eq!(
            graph.regular_successors(anchor).collect::<Vec<_>>(),
            vec![b[2]]
        );
    }

    #[test]
    fn regularly_entered_handler_is_flagged_until_anchored() {
        let mut graph = ControlFlowGraph::new();
        let b = make_blocks(&mut graph, 3);
        let range = graph.add_range(vec![b[0]], b[2], None);
        graph.add_edge(b[0], CfgEdge::exception(b[2], range)).unwrap();
        // Fall-through into the handler from unrelated code.
        graph.add_edge(b[1], CfgEdge::regular(b[2])).unwrap();

        assert!(has_obfuscated_layout(&graph));
        insert_empty_handlers(&mut graph);
        assert!(!has_obfuscated_layout(&graph));
    }
}
