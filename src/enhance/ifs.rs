//! If-statement merging.
//!
//! Coalesces `if (a) { if (b) X }` into `if (a && b) X` when the inner
//! head carries nothing but its condition, and unwraps `else` arms that
//! hold a single nested `if` so chains render as `else if`.

use crate::{
    expr::{Expr, FunctionKind},
    stmt::{IfKind, StatementId, StatementKind, StatementTree},
};

use super::{dissolve_subtree, redirect_stmt_refs};

/// Runs both merges over the whole tree. Returns `true` on any change.
pub fn merge_all_ifs(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    loop {
        if let Some(outer) = find_and_candidate(tree) {
            merge_and(tree, outer);
            changed = true;
            continue;
        }
        if let Some(outer) = find_else_wrapper(tree) {
            unwrap_else(tree, outer);
            changed = true;
            continue;
        }
        return changed;
    }
}

/// Outer `if` without else whose then-arm is exactly another `if` without
/// else, with a condition-only inner head.
fn find_and_candidate(tree: &StatementTree) -> Option<StatementId> {
    tree.preorder().into_iter().find(|&id| {
        let stmt = tree.stmt(id);
        let StatementKind::If { kind: IfKind::If } = stmt.kind else {
            return false;
        };
        if stmt.children.len() != 2 {
            return false;
        }
        let Some(inner) = nested_if(tree, stmt.children[1]) else {
            return false;
        };
        let inner_stmt = tree.stmt(inner);
        matches!(inner_stmt.kind, StatementKind::If { kind: IfKind::If })
            && inner_stmt.children.len() == 2
            && condition_only(tree, inner_stmt.children[0])
            && head_condition(tree, stmt.children[0]).is_some()
    })
}

fn merge_and(tree: &mut StatementTree, outer: StatementId) {
    let outer_head = tree.stmt(outer).children[0];
    let then_child = tree.stmt(outer).children[1];
    let Some(inner) = nested_if(tree, then_child) else {
        return;
    };
    let inner_head = tree.stmt(inner).children[0];
    let inner_then = tree.stmt(inner).children[1];

    let (Some(a), Some(b)) = (
        head_condition(tree, outer_head),
        head_condition(tree, inner_head),
    ) else {
        return;
    };
    let merged = Expr::Function {
        kind: FunctionKind::BoolAnd,
        operands: vec![a, b],
    };
    if let Some(Expr::Branch { condition }) = tree.stmt_mut(outer_head).exprs.last_mut() {
        *condition = Box::new(merged);
    }

    // The inner body takes the then slot; the dissolved inner structure
    // redirects into it.
    tree.detach(inner_then);
    redirect_stmt_refs(tree, inner_head, inner_then, outer);
    redirect_stmt_refs(tree, inner, inner_then, outer);
    if then_child != inner {
        redirect_stmt_refs(tree, then_child, inner_then, outer);
    }

    tree.detach(then_child);
    dissolve_subtree(tree, then_child);
    tree.attach(outer, inner_then);
}

/// `if/else` whose else-arm is a sequence holding exactly one `if`.
fn find_else_wrapper(tree: &StatementTree) -> Option<StatementId> {
    tree.preorder().into_iter().find(|&id| {
        let stmt = tree.stmt(id);
        let StatementKind::If {
            kind: IfKind::IfElse,
        } = stmt.kind
        else {
            return false;
        };
        if stmt.children.len() != 3 {
            return false;
        }
        let else_child = stmt.children[2];
        let else_stmt = tree.stmt(else_child);
        matches!(else_stmt.kind, StatementKind::Sequence)
            && else_stmt.children.len() == 1
            && matches!(
                tree.stmt(else_stmt.children[0]).kind,
                StatementKind::If { .. }
            )
    })
}

fn unwrap_else(tree: &mut StatementTree, outer: StatementId) {
    let wrapper = tree.stmt(outer).children[2];
    let nested = tree.stmt(wrapper).children[0];
    redirect_stmt_refs(tree, wrapper, nested, outer);

    tree.detach(nested);
    tree.stmt_mut(wrapper).children.clear();
    tree.detach(wrapper);
    tree.dissolve(wrapper);
    tree.attach(outer, nested);
}

/// Resolves a then-arm to the `if` it holds: either directly, or through
/// a single-child sequence.
fn nested_if(tree: &StatementTree, child: StatementId) -> Option<StatementId> {
    let stmt = tree.stmt(child);
    match stmt.kind {
        StatementKind::If { .. } => Some(child),
        StatementKind::Sequence if stmt.children.len() == 1 => {
            let only = stmt.children[0];
            matches!(tree.stmt(only).kind, StatementKind::If { .. }).then_some(only)
        }
        _ => None,
    }
}

/// A head leaf holding nothing but its branch.
fn condition_only(tree: &StatementTree, head: StatementId) -> bool {
    let stmt = tree.stmt(head);
    stmt.is_basic() && stmt.exprs.len() == 1 && matches!(stmt.exprs[0], Expr::Branch { .. })
}

fn head_condition(tree: &StatementTree, head: StatementId) -> Option<Expr> {
    match tree.stmt(head).exprs.last() {
        Some(Expr::Branch { condition }) => Some(condition.as_ref().clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{Comparison, ConstValue},
        cfg::BlockId,
        expr::VarRef,
    };

    fn make_leaf(tree: &mut StatementTree, parent: StatementId, block: usize) -> StatementId {
        let leaf = tree.add(StatementKind::Basic {
            block: BlockId::new(block),
        });
        tree.attach(parent, leaf);
        leaf
    }

    fn branch(slot: u16) -> Expr {
        Expr::Branch {
            condition: Box::new(Expr::Function {
                kind: FunctionKind::Compare(Comparison::Ne),
                operands: vec![
                    Expr::var(VarRef::local(slot)),
                    Expr::Const(ConstValue::Int(0)),
                ],
            }),
        }
    }

    #[test]
    fn nested_ifs_merge_into_a_conjunction() {
        let mut tree = StatementTree::new();
        let outer = tree.add(StatementKind::If { kind: IfKind::If });
        tree.attach(tree.root(), outer);
        let outer_head = make_leaf(&mut tree, outer, 0);
        tree.stmt_mut(outer_head).exprs = vec![branch(0)];

        let inner = tree.add(StatementKind::If { kind: IfKind::If });
        tree.attach(outer, inner);
        let inner_head = make_leaf(&mut tree, inner, 1);
        tree.stmt_mut(inner_head).exprs = vec![branch(1)];
        let body = make_leaf(&mut tree, inner, 2);

        assert!(merge_all_ifs(&mut tree));
        assert_eq!(tree.stmt(outer).children, vec![outer_head, body]);
        assert!(tree.stmt(inner).is_dead());
        let Some(Expr::Branch { condition }) = tree.stmt(outer_head).exprs.last() else {
            panic!("expected branch");
        };
        assert!(matches!(
            condition.as_ref(),
            Expr::Function {
                kind: FunctionKind::BoolAnd,
                ..
            }
        ));
        assert!(!merge_all_ifs(&mut tree));
    }

    #[test]
    fn inner_head_with_side_effects_blocks_the_merge() {
        let mut tree = StatementTree::new();
        let outer = tree.add(StatementKind::If { kind: IfKind::If });
        tree.attach(tree.root(), outer);
        let outer_head = make_leaf(&mut tree, outer, 0);
        tree.stmt_mut(outer_head).exprs = vec![branch(0)];

        let inner = tree.add(StatementKind::If { kind: IfKind::If });
        tree.attach(outer, inner);
        let inner_head = make_leaf(&mut tree, inner, 1);
        tree.stmt_mut(inner_head).exprs = vec![
            Expr::assign(VarRef::local(2), Expr::Const(ConstValue::Int(5))),
            branch(1),
        ];
        make_leaf(&mut tree, inner, 2);

        assert!(!merge_all_ifs(&mut tree));
    }

    #[test]
    fn else_arm_wrapping_a_single_if_unwraps() {
        let mut tree = StatementTree::new();
        let outer = tree.add(StatementKind::If {
            kind: IfKind::IfElse,
        });
        tree.attach(tree.root(), outer);
        let head = make_leaf(&mut tree, outer, 0);
        tree.stmt_mut(head).exprs = vec![branch(0)];
        let then_leaf = make_leaf(&mut tree, outer, 1);

        let wrapper = tree.add(StatementKind::Sequence);
        tree.attach(outer, wrapper);
        let chained = tree.add(StatementKind::If { kind: IfKind::If });
        tree.attach(wrapper, chained);
        let chained_head = make_leaf(&mut tree, chained, 2);
        tree.stmt_mut(chained_head).exprs = vec![branch(1)];
        make_leaf(&mut tree, chained, 3);

        assert!(merge_all_ifs(&mut tree));
        assert_eq!(tree.stmt(outer).children, vec![head, then_leaf, chained]);
        assert!(tree.stmt(wrapper).is_dead());
    }
}
