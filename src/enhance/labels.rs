//! Edge cleanup and label identification.

use std::collections::HashMap;

use crate::stmt::{StatEdgeKind, StatementId, StatementKind, StatementTree};

/// Repairs edges invalidated by restructuring. Returns `true` when any
/// edge was rewritten or dropped.
///
/// A break or continue whose closure no longer encloses its source is a
/// leftover from a dissolved or relocated region; it degrades to a plain
/// regular edge. Duplicate edges collapse to one.
pub fn cleanup_edges(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    for id in tree.preorder() {
        let mut edges = std::mem::take(&mut tree.stmt_mut(id).successors);
        let before = edges.clone();

        for edge in &mut edges {
            let stale = match edge.closure {
                Some(closure) => tree.stmt(closure).is_dead() || !tree.contains(closure, id),
                None => false,
            };
            if stale {
                edge.kind = StatEdgeKind::Regular;
                edge.closure = None;
            }
        }
        let mut seen = Vec::new();
        edges.retain(|e| {
            if seen.contains(e) {
                false
            } else {
                seen.push(*e);
                true
            }
        });

        changed |= edges != before;
        tree.stmt_mut(id).successors = edges;
    }
    changed
}

/// Assigns label numbers to statements that a break or continue must name
/// explicitly. Returns `true` when the assignment differs from the
/// previous round.
///
/// A break names its closure when that closure is not the innermost
/// enclosing loop or switch of the jump's source; a continue names its
/// loop when it is not the innermost enclosing loop.
pub fn identify_labels(tree: &mut StatementTree) -> bool {
    let mut needs_label = Vec::new();
    for id in tree.preorder() {
        for edge in &tree.stmt(id).successors {
            let Some(closure) = edge.closure else {
                continue;
            };
            let implicit = match edge.kind {
                StatEdgeKind::Break => innermost_breakable(tree, id),
                StatEdgeKind::Continue => tree.enclosing_loop(id),
                _ => continue,
            };
            if implicit != Some(closure) && !needs_label.contains(&closure) {
                needs_label.push(closure);
            }
        }
    }

    let desired: HashMap<StatementId, usize> = tree
        .preorder()
        .into_iter()
        .filter(|id| needs_label.contains(id))
        .zip(1..)
        .collect();

    let mut changed = false;
    for idx in 0..tree.arena_len() {
        let id = StatementId::new(idx);
        let label = desired.get(&id).copied();
        if tree.stmt(id).label != label {
            tree.stmt_mut(id).label = label;
            changed = true;
        }
    }
    changed
}

/// Innermost ancestor a plain `break` would exit: a loop or a switch.
fn innermost_breakable(tree: &StatementTree, id: StatementId) -> Option<StatementId> {
    tree.ancestors(id).skip(1).find(|&a| {
        matches!(
            tree.stmt(a).kind,
            StatementKind::Loop { .. } | StatementKind::Switch { .. }
        )
    })
}
