//! Structural enhancement passes.
//!
//! Each pass takes the statement tree, applies one class of rewrite, and
//! reports whether it changed anything. The pipeline drives them as an
//! outer fixpoint: a full round with no change terminates the suite, and
//! single-block inlining restarts the round from the top.

pub mod exits;
pub mod ifs;
pub mod inline_block;
pub mod labels;
pub mod loops;
pub mod merge;
pub mod notnull;
pub mod sequences;

use crate::{
    cfg::ControlFlowGraph,
    expr::{Expr, FunctionKind},
    stmt::{StatementId, StatementKind, StatementTree},
};

/// Rewrites every branch condition into source polarity.
///
/// Lifting records the raw "branch taken" condition. Whether taken means
/// entering the then-branch or exiting a loop depends on how the parser
/// arranged the arms, which is visible in the CFG successor order: the
/// branch target is always the first regular successor. Conditions are
/// negated here so later passes (if-merging, loop classification) can
/// combine them without tracking arm placement.
pub fn normalize_conditions(graph: &ControlFlowGraph, tree: &mut StatementTree) {
    for leaf in tree.basic_leaves() {
        let Some(block) = block_of(tree, leaf) else {
            continue;
        };
        if !matches!(tree.stmt(leaf).exprs.last(), Some(Expr::Branch { .. })) {
            continue;
        }
        let raw: Vec<_> = graph.regular_successors(block).collect();
        if raw.len() != 2 {
            continue;
        }

        let negate = if let Some((_, then_child)) = if_head_of(tree, leaf) {
            // Condition should be true when the then-arm runs.
            entry_of(tree, then_child) == Some(raw[1])
        } else if let Some(lp) = tree.enclosing_loop(leaf) {
            // Condition should be true when the loop keeps running.
            !tree.collect_blocks(lp).contains(&raw[0])
        } else {
            continue;
        };

        if negate {
            if let Some(Expr::Branch { condition }) = tree.stmt_mut(leaf).exprs.last_mut() {
                let negated = negate_condition(condition.as_ref().clone());
                *condition = Box::new(negated);
            }
        }
    }
}

/// Negates a boolean condition, inverting comparisons directly and
/// unwrapping a double negation.
#[must_use]
pub fn negate_condition(condition: Expr) -> Expr {
    match condition {
        Expr::Function {
            kind: FunctionKind::Compare(cmp),
            operands,
        } => Expr::Function {
            kind: FunctionKind::Compare(cmp.negate()),
            operands,
        },
        Expr::Function {
            kind: FunctionKind::Not,
            mut operands,
        } if operands.len() == 1 => operands.remove(0),
        other => Expr::Function {
            kind: FunctionKind::Not,
            operands: vec![other],
        },
    }
}

/// The basic block a leaf represents, `None` for non-leaves.
pub(crate) fn block_of(tree: &StatementTree, id: StatementId) -> Option<crate::cfg::BlockId> {
    match tree.stmt(id).kind {
        StatementKind::Basic { block } => Some(block),
        _ => None,
    }
}

/// Entry block of a statement, falling back to its first contained block.
pub(crate) fn entry_of(tree: &StatementTree, id: StatementId) -> Option<crate::cfg::BlockId> {
    tree.stmt(id)
        .entry_block
        .or_else(|| tree.collect_blocks(id).first().copied())
}

/// When `leaf` is the head of an `If`, returns the `If` and its then-child.
pub(crate) fn if_head_of(
    tree: &StatementTree,
    leaf: StatementId,
) -> Option<(StatementId, StatementId)> {
    let parent = tree.stmt(leaf).parent?;
    let stmt = tree.stmt(parent);
    if matches!(stmt.kind, StatementKind::If { .. })
        && stmt.children.first() == Some(&leaf)
        && stmt.children.len() >= 2
    {
        return Some((parent, stmt.children[1]));
    }
    None
}

/// Rewrites every edge target and closure reference from `from` to the
/// given replacements, across the whole arena.
pub(crate) fn redirect_stmt_refs(
    tree: &mut StatementTree,
    from: StatementId,
    target: StatementId,
    closure: StatementId,
) {
    for idx in 0..tree.arena_len() {
        let id = StatementId::new(idx);
        for edge in &mut tree.stmt_mut(id).successors {
            if edge.target == from {
                edge.target = target;
            }
            if edge.closure == Some(from) {
                edge.closure = Some(closure);
            }
        }
    }
}

/// Tombstones `id` and everything beneath it.
pub(crate) fn dissolve_subtree(tree: &mut StatementTree, id: StatementId) {
    let children = tree.stmt(id).children.clone();
    for child in children {
        dissolve_subtree(tree, child);
    }
    tree.dissolve(id);
}
