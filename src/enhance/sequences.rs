//! Sequence condensation.
//!
//! The parser and the finally processor both leave nested `Sequence`
//! statements behind. Condensation flattens a sequence into its sequence
//! parent and dissolves single-child sequences, so the rest of the suite
//! sees the shallowest tree that still expresses the same order.

use crate::stmt::{StatementId, StatementKind, StatementTree};

use super::redirect_stmt_refs;

/// Flattens nested sequences until none remain. Returns `true` when the
/// tree changed.
pub fn condense_sequences(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    loop {
        let Some((parent, seq)) = find_collapsible(tree) else {
            return changed;
        };
        if matches!(tree.stmt(parent).kind, StatementKind::Sequence) {
            splice(tree, parent, seq);
        } else {
            replace_with_only_child(tree, parent, seq);
        }
        changed = true;
    }
}

/// Clears per-statement bookkeeping (labels) left over from an earlier
/// enhancement round.
pub fn clear_markers(tree: &mut StatementTree) {
    for idx in 0..tree.arena_len() {
        tree.stmt_mut(StatementId::new(idx)).label = None;
    }
}

fn find_collapsible(tree: &StatementTree) -> Option<(StatementId, StatementId)> {
    for id in tree.preorder() {
        if !matches!(tree.stmt(id).kind, StatementKind::Sequence) {
            continue;
        }
        let Some(parent) = tree.stmt(id).parent else {
            continue;
        };
        // Keep the method body sequence even when it has a single child.
        if matches!(tree.stmt(parent).kind, StatementKind::Sequence)
            || (tree.stmt(id).children.len() == 1
                && !matches!(tree.stmt(parent).kind, StatementKind::Root))
        {
            return Some((parent, id));
        }
    }
    None
}

/// Splices `seq`'s children into its sequence parent at `seq`'s position.
fn splice(tree: &mut StatementTree, parent: StatementId, seq: StatementId) {
    let children = std::mem::take(&mut tree.stmt_mut(seq).children);
    let replacement_target = children
        .first()
        .copied()
        .unwrap_or_else(|| tree.dummy_exit());
    redirect_stmt_refs(tree, seq, replacement_target, parent);

    let Some(pos) = tree.stmt(parent).children.iter().position(|&c| c == seq) else {
        return;
    };
    tree.stmt_mut(parent).children.remove(pos);
    for (offset, &child) in children.iter().enumerate() {
        tree.stmt_mut(parent).children.insert(pos + offset, child);
        tree.stmt_mut(child).parent = Some(parent);
    }
    tree.stmt_mut(seq).parent = None;
    tree.dissolve(seq);
}

/// Replaces a single-child `seq` with that child in `parent`'s child list.
fn replace_with_only_child(tree: &mut StatementTree, parent: StatementId, seq: StatementId) {
    let child = tree.stmt(seq).children[0];
    redirect_stmt_refs(tree, seq, child, parent);

    tree.stmt_mut(seq).children.clear();
    if let Some(slot) = tree
        .stmt_mut(parent)
        .children
        .iter_mut()
        .find(|c| **c == seq)
    {
        *slot = child;
    }
    tree.stmt_mut(child).parent = Some(parent);
    tree.stmt_mut(seq).parent = None;
    tree.dissolve(seq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BlockId;

    fn make_leaf(tree: &mut StatementTree, parent: StatementId, block: usize) -> StatementId {
        let leaf = tree.add(StatementKind::Basic {
            block: BlockId::new(block),
        });
        tree.attach(parent, leaf);
        leaf
    }

    #[test]
    fn nested_sequence_is_flattened() {
        let mut tree = StatementTree::new();
        let outer = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), outer);
        let a = make_leaf(&mut tree, outer, 0);
        let inner = tree.add(StatementKind::Sequence);
        tree.attach(outer, inner);
        let b = make_leaf(&mut tree, inner, 1);
        let c = make_leaf(&mut tree, inner, 2);
        let d = make_leaf(&mut tree, outer, 3);

        assert!(condense_sequences(&mut tree));
        assert_eq!(tree.stmt(outer).children, vec![a, b, c, d]);
        assert!(tree.stmt(inner).is_dead());
        assert!(!condense_sequences(&mut tree));
    }

    #[test]
    fn single_child_sequence_under_an_if_dissolves() {
        let mut tree = StatementTree::new();
        let body = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), body);
        let cond = tree.add(StatementKind::If {
            kind: crate::stmt::IfKind::If,
        });
        tree.attach(body, cond);
        let head = make_leaf(&mut tree, cond, 0);
        let wrapper = tree.add(StatementKind::Sequence);
        tree.attach(cond, wrapper);
        let then_leaf = make_leaf(&mut tree, wrapper, 1);

        assert!(condense_sequences(&mut tree));
        assert_eq!(tree.stmt(cond).children, vec![head, then_leaf]);
        assert_eq!(tree.stmt(then_leaf).parent, Some(cond));
    }

    #[test]
    fn body_sequence_with_one_leaf_survives() {
        let mut tree = StatementTree::new();
        let body = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), body);
        make_leaf(&mut tree, body, 0);

        assert!(!condense_sequences(&mut tree));
        assert!(!tree.stmt(body).is_dead());
    }
}
