//! Single-block inlining.
//!
//! Simplification can drain a leaf of every expression (a goto-only block,
//! or a block whose stores all folded away). Empty leaves are dissolved
//! with their traffic rerouted, and adjacent leaves in a sequence merge
//! when the flow between them is unconditional. Any change here restarts
//! the enhancement suite, since the shallower tree can expose new matches
//! for every other pass.

use crate::stmt::{StatEdgeKind, StatementId, StatementKind, StatementTree};

use super::redirect_stmt_refs;

/// Dissolves empty leaves and merges unconditional neighbors. Returns
/// `true` on any change.
pub fn inline_single_blocks(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    loop {
        if let Some(leaf) = find_empty_leaf(tree) {
            remove_empty_leaf(tree, leaf);
            changed = true;
            continue;
        }
        if let Some((first, second)) = find_mergeable_pair(tree) {
            merge_pair(tree, first, second);
            changed = true;
            continue;
        }
        return changed;
    }
}

/// An expression-less leaf in a sequence with siblings, not serving as a
/// region head.
fn find_empty_leaf(tree: &StatementTree) -> Option<StatementId> {
    tree.preorder().into_iter().find(|&id| {
        let stmt = tree.stmt(id);
        if !stmt.is_basic() || !stmt.exprs.is_empty() {
            return false;
        }
        let Some(parent) = stmt.parent else {
            return false;
        };
        matches!(tree.stmt(parent).kind, StatementKind::Sequence)
            && tree.stmt(parent).children.len() > 1
            && stmt
                .successors
                .iter()
                .filter(|e| e.kind != StatEdgeKind::Exception)
                .count()
                <= 1
    })
}

fn remove_empty_leaf(tree: &mut StatementTree, leaf: StatementId) {
    let forward = tree
        .stmt(leaf)
        .successors
        .iter()
        .find(|e| e.kind != StatEdgeKind::Exception)
        .map(|e| e.target);
    // With no outgoing flow, fall through to the structural next sibling.
    let target = forward
        .or_else(|| next_sibling(tree, leaf))
        .unwrap_or_else(|| tree.dummy_exit());
    let Some(parent) = tree.stmt(leaf).parent else {
        return;
    };
    redirect_stmt_refs(tree, leaf, target, parent);
    tree.dissolve(leaf);
}

fn next_sibling(tree: &StatementTree, id: StatementId) -> Option<StatementId> {
    let parent = tree.stmt(id).parent?;
    let siblings = &tree.stmt(parent).children;
    let pos = siblings.iter().position(|&c| c == id)?;
    siblings.get(pos + 1).copied()
}

/// Adjacent leaves where the first falls through to the second and the
/// second has no other way in.
fn find_mergeable_pair(tree: &StatementTree) -> Option<(StatementId, StatementId)> {
    for id in tree.preorder() {
        if !matches!(tree.stmt(id).kind, StatementKind::Sequence) {
            continue;
        }
        let children = tree.stmt(id).children.clone();
        for pair in children.windows(2) {
            let (first, second) = (pair[0], pair[1]);
            if !tree.stmt(first).is_basic() || !tree.stmt(second).is_basic() {
                continue;
            }
            let only_fall_through = tree.stmt(first).successors.len() == 1
                && tree.stmt(first).successors[0].kind == StatEdgeKind::Regular
                && tree.stmt(first).successors[0].target == second;
            if only_fall_through && tree.predecessors(second).len() == 1 {
                return Some((first, second));
            }
        }
    }
    None
}

fn merge_pair(tree: &mut StatementTree, first: StatementId, second: StatementId) {
    let exprs = std::mem::take(&mut tree.stmt_mut(second).exprs);
    let edges = std::mem::take(&mut tree.stmt_mut(second).successors);
    tree.stmt_mut(first).exprs.extend(exprs);
    tree.stmt_mut(first).successors = edges;
    let Some(parent) = tree.stmt(first).parent else {
        return;
    };
    redirect_stmt_refs(tree, second, first, parent);
    tree.dissolve(second);
}
