//! The closing continue/break rewrite.

use crate::stmt::{StatEdgeKind, StatementId, StatementTree};

/// Rewrites every `continue` edge that is indistinguishable from a loop
/// exit, and drops the implicit loop-back of a header-conditional loop.
/// Returns the number of edges rewritten or removed.
///
/// This pass invalidates the closure bookkeeping earlier passes rely on;
/// it must be the pipeline's last mutation.
pub fn replace_continue_with_break(tree: &mut StatementTree) -> usize {
    let mut rewritten = 0;
    for idx in 0..tree.arena_len() {
        let id = StatementId::new(idx);
        if tree.stmt(id).is_dead() {
            continue;
        }
        let last_in_loop = is_loop_tail(tree, id);
        let mut edges = std::mem::take(&mut tree.stmt_mut(id).successors);
        edges.retain_mut(|edge| {
            if edge.kind != StatEdgeKind::Continue {
                return true;
            }
            let enclosing = edge
                .closure
                .filter(|&c| !tree.stmt(c).is_dead() && tree.contains(c, id));
            match enclosing {
                // Without a live enclosing loop, continuing is leaving.
                None => {
                    edge.kind = StatEdgeKind::Break;
                    edge.closure = None;
                    rewritten += 1;
                    true
                }
                // The natural loop-back from the body tail is implicit.
                Some(lp) if last_in_loop == Some(lp) => {
                    rewritten += 1;
                    false
                }
                Some(_) => true,
            }
        });
        tree.stmt_mut(id).successors = edges;
    }
    rewritten
}

/// The loop whose body ends at `id`, walking up through trailing
/// positions.
fn is_loop_tail(tree: &StatementTree, id: StatementId) -> Option<StatementId> {
    let mut current = id;
    loop {
        let parent = tree.stmt(current).parent?;
        if tree.stmt(parent).children.last() != Some(&current) {
            return None;
        }
        if tree.stmt(parent).is_loop() {
            return Some(parent);
        }
        current = parent;
    }
}

/// Rewrites every edge target and closure from `from` to `to`.
pub(crate) fn redirect_all(tree: &mut StatementTree, from: StatementId, to: StatementId) {
    for idx in 0..tree.arena_len() {
        let id = StatementId::new(idx);
        for edge in &mut tree.stmt_mut(id).successors {
            if edge.target == from {
                edge.target = to;
            }
            if edge.closure == Some(from) {
                edge.closure = Some(to);
            }
        }
    }
}
