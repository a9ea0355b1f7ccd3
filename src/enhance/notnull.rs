//! Instrumented not-null-check removal.
//!
//! IDE bytecode instrumentation guards annotated parameters with
//! `if (x == null) throw ...` preambles. When enabled by configuration,
//! those guards are stripped so the decompiled body matches the written
//! source. A successful strip re-triggers variable simplification, since
//! removing the guard can orphan stack temporaries.

use crate::{
    bytecode::{Comparison, ConstValue},
    expr::{ExitKind, Expr, FunctionKind},
    stmt::{IfKind, StatementId, StatementKind, StatementTree},
};

use super::{dissolve_subtree, redirect_stmt_refs};

/// Removes instrumented null guards. Returns `true` when any guard was
/// stripped.
pub fn remove_not_null_checks(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    while let Some(guard) = find_guard(tree) {
        strip(tree, guard);
        changed = true;
    }
    changed
}

/// An `if` whose head is a bare null comparison and whose then-arm does
/// nothing but throw.
fn find_guard(tree: &StatementTree) -> Option<StatementId> {
    tree.preorder().into_iter().find(|&id| {
        let stmt = tree.stmt(id);
        let StatementKind::If { kind: IfKind::If } = stmt.kind else {
            return false;
        };
        if stmt.children.len() != 2 {
            return false;
        }
        is_null_check_head(tree, stmt.children[0]) && is_throw_only(tree, stmt.children[1])
    })
}

fn is_null_check_head(tree: &StatementTree, head: StatementId) -> bool {
    let stmt = tree.stmt(head);
    if !stmt.is_basic() || stmt.exprs.len() != 1 {
        return false;
    }
    let Expr::Branch { condition } = &stmt.exprs[0] else {
        return false;
    };
    let Expr::Function {
        kind: FunctionKind::Compare(Comparison::Eq),
        operands,
    } = condition.as_ref()
    else {
        return false;
    };
    matches!(
        operands.as_slice(),
        [Expr::Var(_), Expr::Const(ConstValue::Null)]
            | [Expr::Const(ConstValue::Null), Expr::Var(_)]
    )
}

fn is_throw_only(tree: &StatementTree, arm: StatementId) -> bool {
    let stmt = tree.stmt(arm);
    stmt.is_basic()
        && matches!(
            stmt.exprs.last(),
            Some(Expr::Exit {
                kind: ExitKind::Throw,
                ..
            })
        )
        && stmt
            .exprs
            .iter()
            .all(|e| matches!(e, Expr::Exit { .. } | Expr::New { .. } | Expr::Invocation { .. }))
}

fn strip(tree: &mut StatementTree, guard: StatementId) {
    // Flow into the guard continues at whatever follows it.
    let target = next_statement(tree, guard).unwrap_or_else(|| tree.dummy_exit());
    let parent = tree.stmt(guard).parent.unwrap_or_else(|| tree.root());
    for child in tree.stmt(guard).children.clone() {
        redirect_stmt_refs(tree, child, target, parent);
    }
    redirect_stmt_refs(tree, guard, target, parent);
    dissolve_subtree(tree, guard);
}

fn next_statement(tree: &StatementTree, id: StatementId) -> Option<StatementId> {
    let parent = tree.stmt(id).parent?;
    let siblings = &tree.stmt(parent).children;
    let pos = siblings.iter().position(|&c| c == id)?;
    siblings.get(pos + 1).copied()
}
