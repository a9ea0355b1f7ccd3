//! Method-exit condensation.
//!
//! Compilers duplicate the final `return` into every arm that reaches it.
//! Condensation rewrites duplicated returns into jumps to the canonical
//! exit leaf, and the finalizer later strips the trailing `return;` of a
//! void method entirely.

use crate::{
    expr::{Expr, ExitKind},
    stmt::{StatEdge, StatementId, StatementKind, StatementTree},
};

/// Merges duplicated return points into the method's final return.
/// Returns `true` when any return was rewritten.
pub fn condense_exits(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    loop {
        let leaves = tree.basic_leaves();
        let Some(&canonical) = leaves.last() else {
            return changed;
        };
        let Some(canonical_value) = trailing_return(tree, canonical) else {
            return changed;
        };

        if !mergeable_value(canonical_value) {
            return changed;
        }
        let duplicate = leaves.iter().copied().find(|&leaf| {
            leaf != canonical
                && trailing_return(tree, leaf).is_some_and(|v| v == canonical_value)
                && same_protection(tree, leaf, canonical)
        });
        let Some(leaf) = duplicate else {
            return changed;
        };

        tree.stmt_mut(leaf).exprs.pop();
        tree.stmt_mut(leaf).successors.clear();
        let edge = match escape_closure(tree, leaf, canonical) {
            Some(closure) => StatEdge::brk(canonical, closure),
            None => StatEdge::regular(canonical),
        };
        tree.add_edge(leaf, edge);
        changed = true;
    }
}

/// Drops the trailing `return;` of the method's last leaf. Returns `true`
/// when one was removed.
pub fn remove_redundant_returns(tree: &mut StatementTree) -> bool {
    let leaves = tree.basic_leaves();
    let Some(&last) = leaves.last() else {
        return false;
    };
    match trailing_return(tree, last) {
        Some(None) => {
            tree.stmt_mut(last).exprs.pop();
            true
        }
        _ => false,
    }
}

fn trailing_return<'t>(tree: &'t StatementTree, leaf: StatementId) -> Option<&'t Option<Box<Expr>>> {
    match tree.stmt(leaf).exprs.last() {
        Some(Expr::Exit {
            kind: ExitKind::Return,
            value,
        }) => Some(value),
        _ => None,
    }
}

/// Only effect-free return values may be deduplicated.
fn mergeable_value(value: &Option<Box<Expr>>) -> bool {
    match value {
        None => true,
        Some(expr) => matches!(expr.as_ref(), Expr::Const(_) | Expr::Var(_)),
    }
}

/// Both leaves must sit under the same protected regions; merging across
/// a try boundary would skip a handler.
fn same_protection(tree: &StatementTree, a: StatementId, b: StatementId) -> bool {
    let guards = |id: StatementId| -> Vec<StatementId> {
        tree.ancestors(id)
            .filter(|&s| {
                matches!(
                    tree.stmt(s).kind,
                    StatementKind::TryCatch { .. } | StatementKind::Synchronized
                )
            })
            .collect()
    };
    guards(a) == guards(b)
}

/// The statement a jump from `leaf` to `target` breaks out of: the child
/// of their lowest common ancestor on `leaf`'s side, when that child is
/// not `leaf` itself.
fn escape_closure(
    tree: &StatementTree,
    leaf: StatementId,
    target: StatementId,
) -> Option<StatementId> {
    let lca = tree
        .ancestors(leaf)
        .find(|&a| tree.contains(a, target))?;
    let mut previous = None;
    for anc in tree.ancestors(leaf) {
        if anc == lca {
            break;
        }
        previous = Some(anc);
    }
    previous.filter(|&p| p != leaf)
}
