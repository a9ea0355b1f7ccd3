//! Loop-shape enhancement.
//!
//! The parser emits every loop as [`LoopKind::Unconditional`]. This pass
//! reads the condition placement off the loop body and upgrades the kind:
//! a conditional tail that jumps back is a `do-while`, a conditional
//! header with an exiting branch is a `while`, and a `while` whose body
//! ends in a bare increment is a `for`.
//!
//! A `while` frequently arrives wrapped: the parser folds the exit path
//! into an `if` at the top of the loop body, `loop { if (c) { exit } body }`.
//! That shape is unwrapped here: the condition leaf becomes the loop
//! header (negated, so it reads as the continuation condition), the exit
//! arm moves out behind the loop, and the branch into it becomes a break.

use std::collections::HashSet;

use crate::{
    expr::{Expr, FunctionKind},
    stmt::{IfKind, LoopKind, StatEdgeKind, StatementId, StatementKind, StatementTree},
};

use super::{negate_condition, redirect_stmt_refs};

/// Classifies unconditional loops by condition placement. Returns `true`
/// when any loop changed.
pub fn enhance_loops(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    for id in tree.preorder() {
        if tree.stmt(id).is_dead() {
            continue;
        }
        let StatementKind::Loop { kind } = tree.stmt(id).kind else {
            continue;
        };
        changed |= match kind {
            LoopKind::Unconditional => {
                match_do_while(tree, id) || match_while(tree, id) || extract_while_header(tree, id)
            }
            LoopKind::While => upgrade_to_for(tree, id),
            LoopKind::DoWhile | LoopKind::For => false,
        };
    }
    changed
}

/// First leaf of the loop body, descending through sequence heads.
fn head_leaf(tree: &StatementTree, lp: StatementId) -> Option<StatementId> {
    let mut cur = *tree.stmt(lp).children.first()?;
    loop {
        match tree.stmt(cur).kind {
            StatementKind::Sequence => cur = *tree.stmt(cur).children.first()?,
            StatementKind::Basic { .. } => return Some(cur),
            _ => return None,
        }
    }
}

/// Last leaf of the loop body, descending through sequence tails.
fn tail_leaf(tree: &StatementTree, lp: StatementId) -> Option<StatementId> {
    let mut cur = *tree.stmt(lp).children.last()?;
    loop {
        match tree.stmt(cur).kind {
            StatementKind::Sequence => cur = *tree.stmt(cur).children.last()?,
            StatementKind::Basic { .. } => return Some(cur),
            _ => return None,
        }
    }
}

fn ends_in_branch(tree: &StatementTree, leaf: StatementId) -> bool {
    matches!(tree.stmt(leaf).exprs.last(), Some(Expr::Branch { .. }))
}

/// A tail leaf whose trailing branch jumps back to the header.
fn match_do_while(tree: &mut StatementTree, lp: StatementId) -> bool {
    let Some(tail) = tail_leaf(tree, lp) else {
        return false;
    };
    let qualifies = ends_in_branch(tree, tail)
        && tree
            .stmt(tail)
            .successors
            .iter()
            .any(|e| e.kind == StatEdgeKind::Continue && e.closure == Some(lp));
    if qualifies {
        tree.stmt_mut(lp).kind = StatementKind::Loop {
            kind: LoopKind::DoWhile,
        };
    }
    qualifies
}

/// A header leaf whose trailing branch leaves the loop.
fn match_while(tree: &mut StatementTree, lp: StatementId) -> bool {
    let Some(head) = head_leaf(tree, lp) else {
        return false;
    };
    let qualifies = ends_in_branch(tree, head)
        && tree
            .stmt(head)
            .successors
            .iter()
            .any(|e| !tree.contains(lp, e.target));
    if qualifies {
        tree.stmt_mut(lp).kind = StatementKind::Loop {
            kind: LoopKind::While,
        };
        splice_sole_sequence(tree, lp);
    }
    qualifies
}

/// Unwraps `loop { if (c) { exit-arm } body }` into
/// `while (!c) { body } exit-arm`.
fn extract_while_header(tree: &mut StatementTree, lp: StatementId) -> bool {
    let Some(parent) = tree.stmt(lp).parent else {
        return false;
    };
    if tree.stmt(parent).kind != StatementKind::Sequence {
        return false;
    }
    let Some(&first) = tree.stmt(lp).children.first() else {
        return false;
    };

    // The candidate if either opens the body sequence or is the body.
    let (seq, if_id) = match tree.stmt(first).kind {
        StatementKind::Sequence => match tree.stmt(first).children.first() {
            Some(&inner) if matches!(tree.stmt(inner).kind, StatementKind::If { kind: IfKind::If }) => {
                (Some(first), inner)
            }
            _ => return false,
        },
        StatementKind::If { kind: IfKind::If } => (None, first),
        _ => return false,
    };
    let [cond, arm] = tree.stmt(if_id).children[..] else {
        return false;
    };
    if !tree.stmt(cond).is_basic() || !ends_in_branch(tree, cond) {
        return false;
    }
    if !arm_leaves_loop(tree, lp, cond, arm) {
        return false;
    }

    // Taken branch was the exit path; the hoisted condition must read as
    // "keep looping".
    if let Some(Expr::Branch { condition }) = tree.stmt_mut(cond).exprs.last_mut() {
        let negated = negate_condition(condition.as_ref().clone());
        *condition = Box::new(negated);
    }

    tree.detach(arm);
    tree.detach(cond);
    tree.detach(if_id);
    let host = seq.unwrap_or(lp);
    tree.stmt_mut(host).children.insert(0, cond);
    tree.stmt_mut(cond).parent = Some(host);

    // The exit arm follows the loop.
    let at = tree
        .stmt(parent)
        .children
        .iter()
        .position(|&c| c == lp)
        .map_or(0, |p| p + 1);
    tree.stmt_mut(parent).children.insert(at, arm);
    tree.stmt_mut(arm).parent = Some(parent);

    let arm_set: HashSet<StatementId> = subtree_ids(tree, arm).into_iter().collect();
    for edge in &mut tree.stmt_mut(cond).successors {
        if arm_set.contains(&edge.target) {
            edge.kind = StatEdgeKind::Break;
            edge.closure = Some(lp);
        }
    }
    redirect_stmt_refs(tree, if_id, cond, lp);
    tree.dissolve(if_id);

    tree.stmt_mut(lp).kind = StatementKind::Loop {
        kind: LoopKind::While,
    };
    splice_sole_sequence(tree, lp);
    true
}

/// The arm must be a pure exit path: nothing in it continues the loop or
/// jumps back into the body, and only the condition leaf enters it.
fn arm_leaves_loop(
    tree: &StatementTree,
    lp: StatementId,
    cond: StatementId,
    arm: StatementId,
) -> bool {
    let subtree = subtree_ids(tree, arm);
    let arm_set: HashSet<StatementId> = subtree.iter().copied().collect();
    for &s in &subtree {
        for e in &tree.stmt(s).successors {
            if e.kind == StatEdgeKind::Continue && e.closure == Some(lp) {
                return false;
            }
            if tree.contains(lp, e.target) && !arm_set.contains(&e.target) {
                return false;
            }
        }
        for (pred, _) in tree.predecessors(s) {
            if pred != cond && !arm_set.contains(&pred) {
                return false;
            }
        }
    }
    true
}

/// The body of a `while` ends in a leaf holding only an increment or
/// decrement, the classic `for` update slot.
fn upgrade_to_for(tree: &mut StatementTree, lp: StatementId) -> bool {
    if tree.stmt(lp).children.len() < 2 {
        return false;
    }
    let Some(tail) = tail_leaf(tree, lp) else {
        return false;
    };
    if head_leaf(tree, lp) == Some(tail) {
        return false;
    }
    let stmt = tree.stmt(tail);
    let qualifies = stmt.exprs.len() == 1
        && matches!(
            stmt.exprs[0],
            Expr::Function {
                kind: FunctionKind::IncDec { .. },
                ..
            }
        );
    if qualifies {
        tree.stmt_mut(lp).kind = StatementKind::Loop { kind: LoopKind::For };
    }
    qualifies
}

/// Flattens `Loop[Sequence[..]]` into `Loop[..]` once the kind is known,
/// so the header and update slots sit directly under the loop.
fn splice_sole_sequence(tree: &mut StatementTree, lp: StatementId) {
    let [seq] = tree.stmt(lp).children[..] else {
        return;
    };
    if tree.stmt(seq).kind != StatementKind::Sequence {
        return;
    }
    let children = tree.stmt(seq).children.clone();
    for &child in &children {
        tree.stmt_mut(child).parent = Some(lp);
    }
    tree.stmt_mut(lp).children = children;
    redirect_stmt_refs(tree, seq, lp, lp);
    tree.stmt_mut(seq).children.clear();
    tree.dissolve(seq);
}

/// All live statements of a subtree, the root included.
fn subtree_ids(tree: &StatementTree, id: StatementId) -> Vec<StatementId> {
    let mut out = vec![id];
    let mut i = 0;
    while i < out.len() {
        for &child in &tree.stmt(out[i]).children {
            if !tree.stmt(child).is_dead() {
                out.push(child);
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{Comparison, ConstValue},
        cfg::BlockId,
        expr::VarRef,
        stmt::StatEdge,
    };

    fn make_leaf(tree: &mut StatementTree, parent: StatementId, block: usize) -> StatementId {
        let leaf = tree.add(StatementKind::Basic {
            block: BlockId::new(block),
        });
        tree.attach(parent, leaf);
        leaf
    }

    fn branch_expr() -> Expr {
        Expr::Branch {
            condition: Box::new(Expr::Function {
                kind: FunctionKind::Compare(Comparison::Lt),
                operands: vec![
                    Expr::var(VarRef::local(0)),
                    Expr::Const(ConstValue::Int(10)),
                ],
            }),
        }
    }

    fn make_loop(tree: &mut StatementTree, parent: StatementId) -> StatementId {
        let lp = tree.add(StatementKind::Loop {
            kind: LoopKind::Unconditional,
        });
        tree.attach(parent, lp);
        lp
    }

    fn loop_kind(tree: &StatementTree, lp: StatementId) -> LoopKind {
        match tree.stmt(lp).kind {
            StatementKind::Loop { kind } => kind,
            _ => panic!("not a loop"),
        }
    }

    #[test]
    fn exiting_header_condition_makes_a_while() {
        let mut tree = StatementTree::new();
        let root = tree.root();
        let lp = make_loop(&mut tree, root);
        let head = make_leaf(&mut tree, lp, 0);
        let body = make_leaf(&mut tree, lp, 1);
        let after = make_leaf(&mut tree, root, 2);
        tree.stmt_mut(head).exprs = vec![branch_expr()];
        tree.add_edge(head, StatEdge::brk(after, lp));
        tree.add_edge(body, StatEdge::cont(head, lp));

        assert!(enhance_loops(&mut tree));
        assert_eq!(loop_kind(&tree, lp), LoopKind::While);
        assert!(!enhance_loops(&mut tree));
    }

    #[test]
    fn looping_tail_condition_makes_a_do_while() {
        let mut tree = StatementTree::new();
        let root = tree.root();
        let lp = make_loop(&mut tree, root);
        let body = make_leaf(&mut tree, lp, 0);
        let tail = make_leaf(&mut tree, lp, 1);
        tree.stmt_mut(tail).exprs = vec![branch_expr()];
        tree.add_edge(body, StatEdge::regular(tail));
        tree.add_edge(tail, StatEdge::cont(body, lp));

        assert!(enhance_loops(&mut tree));
        assert_eq!(loop_kind(&tree, lp), LoopKind::DoWhile);
    }

    #[test]
    fn while_with_increment_tail_upgrades_to_for() {
        let mut tree = StatementTree::new();
        let root = tree.root();
        let lp = make_loop(&mut tree, root);
        let head = make_leaf(&mut tree, lp, 0);
        let update = make_leaf(&mut tree, lp, 1);
        let after = make_leaf(&mut tree, root, 2);
        tree.stmt_mut(head).exprs = vec![branch_expr()];
        tree.stmt_mut(update).exprs = vec![Expr::Function {
            kind: FunctionKind::IncDec { delta: 1 },
            operands: vec![Expr::var(VarRef::local(0))],
        }];
        tree.add_edge(head, StatEdge::brk(after, lp));
        tree.add_edge(update, StatEdge::cont(head, lp));

        // Two rounds: Unconditional -> While, then While -> For.
        assert!(enhance_loops(&mut tree));
        assert!(enhance_loops(&mut tree));
        assert_eq!(loop_kind(&tree, lp), LoopKind::For);
        assert!(!enhance_loops(&mut tree));
    }

    #[test]
    fn headless_loop_stays_unconditional() {
        let mut tree = StatementTree::new();
        let root = tree.root();
        let lp = make_loop(&mut tree, root);
        let body = make_leaf(&mut tree, lp, 0);
        tree.add_edge(body, StatEdge::cont(body, lp));

        assert!(!enhance_loops(&mut tree));
        assert_eq!(loop_kind(&tree, lp), LoopKind::Unconditional);
    }

    #[test]
    fn wrapped_exit_arm_is_hoisted_out_of_the_loop() {
        // seq [ loop [ body-seq [ if [ cond, exit-arm ], body ] ] ]
        let mut tree = StatementTree::new();
        let outer = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), outer);
        let lp = make_loop(&mut tree, outer);
        let body_seq = tree.add(StatementKind::Sequence);
        tree.attach(lp, body_seq);
        let if_id = tree.add(StatementKind::If { kind: IfKind::If });
        tree.attach(body_seq, if_id);
        let cond = make_leaf(&mut tree, if_id, 0);
        let arm = make_leaf(&mut tree, if_id, 1);
        let body = make_leaf(&mut tree, body_seq, 2);
        tree.stmt_mut(cond).exprs = vec![branch_expr()];
        tree.stmt_mut(arm).exprs = vec![Expr::Exit {
            kind: crate::expr::ExitKind::Return,
            value: None,
        }];
        tree.add_edge(cond, StatEdge::regular(arm));
        tree.add_edge(cond, StatEdge::regular(body));
        tree.add_edge(arm, StatEdge::regular(tree.dummy_exit()));
        tree.add_edge(body, StatEdge::cont(cond, lp));

        assert!(enhance_loops(&mut tree));
        assert_eq!(loop_kind(&tree, lp), LoopKind::While);

        // Body sequence spliced away, condition leaf leads the loop.
        assert_eq!(tree.stmt(lp).children, vec![cond, body]);
        // The arm sits behind the loop and the branch into it is a break.
        assert_eq!(tree.stmt(outer).children, vec![lp, arm]);
        assert!(tree
            .stmt(cond)
            .successors
            .iter()
            .any(|e| e.target == arm && e.kind == StatEdgeKind::Break && e.closure == Some(lp)));
        // The hoisted condition is negated into continuation polarity.
        let Some(Expr::Branch { condition }) = tree.stmt(cond).exprs.last() else {
            panic!("condition leaf lost its branch");
        };
        assert!(matches!(
            condition.as_ref(),
            Expr::Function {
                kind: FunctionKind::Compare(Comparison::Ge),
                ..
            }
        ));
    }

    #[test]
    fn arm_that_rejoins_the_body_is_not_hoisted() {
        let mut tree = StatementTree::new();
        let outer = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), outer);
        let lp = make_loop(&mut tree, outer);
        let body_seq = tree.add(StatementKind::Sequence);
        tree.attach(lp, body_seq);
        let if_id = tree.add(StatementKind::If { kind: IfKind::If });
        tree.attach(body_seq, if_id);
        let cond = make_leaf(&mut tree, if_id, 0);
        let arm = make_leaf(&mut tree, if_id, 1);
        let body = make_leaf(&mut tree, body_seq, 2);
        tree.stmt_mut(cond).exprs = vec![branch_expr()];
        tree.add_edge(cond, StatEdge::regular(arm));
        tree.add_edge(cond, StatEdge::regular(body));
        // The arm falls back into the loop body.
        tree.add_edge(arm, StatEdge::regular(body));
        tree.add_edge(body, StatEdge::cont(cond, lp));

        assert!(!enhance_loops(&mut tree));
        assert_eq!(loop_kind(&tree, lp), LoopKind::Unconditional);
    }
}
