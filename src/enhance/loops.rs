//! Loop extraction.
//!
//! The parser sometimes folds the statements that run after a loop into
//! the loop body, when the back edge happens to leave them inside the
//! reduced region. A trailing child that never jumps back to the header
//! runs exactly once, so it is hoisted out behind the loop.

use crate::stmt::{StatEdgeKind, StatementId, StatementKind, StatementTree};

/// Moves run-once tails out of loop bodies. Returns `true` when any
/// statement was relocated.
pub fn extract_loops(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    loop {
        let Some((lp, tail)) = find_extractable(tree) else {
            return changed;
        };
        let Some(parent) = tree.stmt(lp).parent else {
            return changed;
        };
        tree.detach(tail);
        let Some(pos) = tree.stmt(parent).children.iter().position(|&c| c == lp) else {
            return changed;
        };
        tree.stmt_mut(parent).children.insert(pos + 1, tail);
        tree.stmt_mut(tail).parent = Some(parent);
        changed = true;
    }
}

fn find_extractable(tree: &StatementTree) -> Option<(StatementId, StatementId)> {
    for id in tree.preorder() {
        if !tree.stmt(id).is_loop() {
            continue;
        }
        // The parent must be a sequence for the tail to land behind the loop.
        let parent = tree.stmt(id).parent?;
        if !matches!(tree.stmt(parent).kind, StatementKind::Sequence) {
            continue;
        }
        let children = &tree.stmt(id).children;
        if children.len() < 2 {
            continue;
        }
        let tail = *children.last()?;
        if can_extract(tree, id, tail) {
            return Some((id, tail));
        }
    }
    None
}

/// A tail is extractable when nothing in it re-enters the loop and every
/// jump out of it leaves the loop entirely.
fn can_extract(tree: &StatementTree, lp: StatementId, tail: StatementId) -> bool {
    let mut loops_back = false;
    for id in subtree(tree, tail) {
        for edge in &tree.stmt(id).successors {
            match edge.kind {
                StatEdgeKind::Continue if edge.closure == Some(lp) => return false,
                _ => {}
            }
            // A target inside the loop but outside the tail would dangle.
            if tree.contains(lp, edge.target) && !tree.contains(tail, edge.target) {
                return false;
            }
        }
    }
    // The loop must still loop from somewhere else.
    for id in subtree(tree, lp) {
        if tree.contains(tail, id) {
            continue;
        }
        if tree
            .stmt(id)
            .successors
            .iter()
            .any(|e| e.kind == StatEdgeKind::Continue && e.closure == Some(lp))
        {
            loops_back = true;
        }
    }
    loops_back
}

fn subtree(tree: &StatementTree, id: StatementId) -> Vec<StatementId> {
    let mut out = vec![id];
    let mut i = 0;
    while i < out.len() {
        out.extend(tree.stmt(out[i]).children.iter().copied());
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfg::BlockId,
        stmt::{LoopKind, StatEdge},
    };

    fn make_leaf(tree: &mut StatementTree, parent: StatementId, block: usize) -> StatementId {
        let leaf = tree.add(StatementKind::Basic {
            block: BlockId::new(block),
        });
        tree.attach(parent, leaf);
        leaf
    }

    #[test]
    fn run_once_tail_is_hoisted_behind_the_loop() {
        let mut tree = StatementTree::new();
        let body = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), body);
        let lp = tree.add(StatementKind::Loop {
            kind: LoopKind::Unconditional,
        });
        tree.attach(body, lp);
        let head = make_leaf(&mut tree, lp, 0);
        let tail = make_leaf(&mut tree, lp, 1);
        tree.add_edge(head, StatEdge::cont(head, lp));
        tree.add_edge(head, StatEdge::brk(tail, lp));

        assert!(extract_loops(&mut tree));
        assert_eq!(tree.stmt(body).children, vec![lp, tail]);
        assert_eq!(tree.stmt(lp).children, vec![head]);
        assert_eq!(tree.stmt(tail).parent, Some(body));
        assert!(!extract_loops(&mut tree));
    }

    #[test]
    fn looping_tail_stays_inside() {
        let mut tree = StatementTree::new();
        let body = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), body);
        let lp = tree.add(StatementKind::Loop {
            kind: LoopKind::Unconditional,
        });
        tree.attach(body, lp);
        let head = make_leaf(&mut tree, lp, 0);
        let tail = make_leaf(&mut tree, lp, 1);
        tree.add_edge(head, StatEdge::regular(tail));
        tree.add_edge(tail, StatEdge::cont(head, lp));

        assert!(!extract_loops(&mut tree));
        assert_eq!(tree.stmt(lp).children, vec![head, tail]);
    }
}
