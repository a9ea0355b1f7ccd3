//! Secondary syntactic functions.

use crate::{
    expr::{Expr, FunctionKind},
    stmt::{IfKind, StatementId, StatementKind, StatementTree},
};

/// Rewrites `if (c) v = a; else v = b;` into `v = c ? a : b`. Returns
/// `true` when any conditional collapsed.
pub fn identify_ternaries(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    while let Some(cond) = find_ternary(tree) {
        collapse_ternary(tree, cond);
        changed = true;
    }
    changed
}

fn find_ternary(tree: &StatementTree) -> Option<StatementId> {
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
        let head = stmt.children[0];
        if !condition_only_head(tree, head) {
            return false;
        }
        match (
            arm_assignment(tree, stmt.children[1]),
            arm_assignment(tree, stmt.children[2]),
        ) {
            (Some(a), Some(b)) => a.same_var(&b),
            _ => false,
        }
    })
}

fn collapse_ternary(tree: &mut StatementTree, cond: StatementId) {
    let head = tree.stmt(cond).children[0];
    let then_arm = tree.stmt(cond).children[1];
    let else_arm = tree.stmt(cond).children[2];

    let Some(Expr::Branch { condition }) = tree.stmt_mut(head).exprs.pop() else {
        return;
    };
    let Some((target, then_value)) = take_assignment(tree, then_arm) else {
        return;
    };
    let Some((_, else_value)) = take_assignment(tree, else_arm) else {
        return;
    };

    let merged = Expr::assign(
        target,
        Expr::Function {
            kind: FunctionKind::Ternary,
            operands: vec![*condition, then_value, else_value],
        },
    );
    tree.stmt_mut(head).exprs.push(merged);
    tree.stmt_mut(head).successors.clear();

    // The head leaf takes the conditional's slot in its parent.
    let Some(parent) = tree.stmt(cond).parent else {
        return;
    };
    tree.detach(head);
    if let Some(slot) = tree
        .stmt_mut(parent)
        .children
        .iter_mut()
        .find(|c| **c == cond)
    {
        *slot = head;
    }
    tree.stmt_mut(head).parent = Some(parent);
    tree.stmt_mut(cond).children.retain(|&c| c != head);
    super::edges::redirect_all(tree, cond, head);
    super::edges::redirect_all(tree, then_arm, head);
    super::edges::redirect_all(tree, else_arm, head);
    let arms = tree.stmt(cond).children.clone();
    for arm in arms {
        tree.dissolve(arm);
    }
    tree.stmt_mut(cond).parent = None;
    tree.dissolve(cond);
}

fn condition_only_head(tree: &StatementTree, head: StatementId) -> bool {
    let stmt = tree.stmt(head);
    stmt.is_basic() && stmt.exprs.len() == 1 && matches!(stmt.exprs[0], Expr::Branch { .. })
}

/// The variable assigned when the arm is a leaf with a single pure
/// variable assignment.
fn arm_assignment(tree: &StatementTree, arm: StatementId) -> Option<crate::expr::VarRef> {
    let stmt = tree.stmt(arm);
    if !stmt.is_basic() || stmt.exprs.len() != 1 {
        return None;
    }
    stmt.exprs[0].assigned_var()
}

fn take_assignment(
    tree: &mut StatementTree,
    arm: StatementId,
) -> Option<(crate::expr::VarRef, Expr)> {
    let target = tree.stmt(arm).exprs[0].assigned_var()?;
    let Expr::Assignment { value, .. } = tree.stmt_mut(arm).exprs.remove(0) else {
        return None;
    };
    Some((target, *value))
}

/// Rewrites `v = v <op> rhs` into the compound form carried on the
/// assignment. Returns `true` on any rewrite.
pub fn identify_compound_assignments(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    for leaf in tree.basic_leaves() {
        for expr in &mut tree.stmt_mut(leaf).exprs {
            changed |= fold_compound(expr);
        }
    }
    changed
}

fn fold_compound(expr: &mut Expr) -> bool {
    let Expr::Assignment {
        target,
        value,
        op: op_slot @ None,
    } = expr
    else {
        return false;
    };
    let Expr::Var(target_var) = target.as_ref() else {
        return false;
    };
    let Expr::Function {
        kind: FunctionKind::Binary(op),
        operands,
    } = value.as_mut()
    else {
        return false;
    };
    if operands.len() != 2 {
        return false;
    }
    let Expr::Var(lhs) = &operands[0] else {
        return false;
    };
    if !lhs.same_var(target_var) {
        return false;
    }
    let rhs = operands.remove(1);
    *op_slot = Some(*op);
    *value = Box::new(rhs);
    true
}
