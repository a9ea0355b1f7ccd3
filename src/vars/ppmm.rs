//! `++`/`--` pattern folding.
//!
//! Rewrites `x = x + 1` and `x = x - 1` assignments into `IncDec`
//! applications. The pipeline re-runs simplification and versioning as
//! long as this pass keeps finding matches.

use crate::{
    bytecode::{BinaryOp, ConstValue},
    expr::{Expr, FunctionKind},
    stmt::StatementTree,
};

/// Folds increment/decrement shapes across every basic leaf. Returns
/// `true` when at least one expression was rewritten.
pub fn fold_increments(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    for leaf in tree.basic_leaves() {
        for expr in &mut tree.stmt_mut(leaf).exprs {
            if let Some(folded) = fold(expr) {
                *expr = folded;
                changed = true;
            }
        }
    }
    changed
}

fn fold(expr: &Expr) -> Option<Expr> {
    let Expr::Assignment { target, value, op: None } = expr else {
        return None;
    };
    let Expr::Var(target_var) = target.as_ref() else {
        return None;
    };
    let Expr::Function { kind: FunctionKind::Binary(binop), operands } = value.as_ref() else {
        return None;
    };
    let delta = match binop {
        BinaryOp::Add => 1,
        BinaryOp::Sub => -1,
        _ => return None,
    };
    let [Expr::Var(read_var), Expr::Const(ConstValue::Int(1))] = operands.as_slice() else {
        return None;
    };
    if !read_var.same_var(target_var) {
        return None;
    }
    Some(Expr::Function {
        kind: FunctionKind::IncDec { delta },
        operands: vec![Expr::Var(*target_var)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfg::BlockId,
        expr::VarRef,
        stmt::{StatementId, StatementKind},
    };

    fn make_leaf(tree: &mut StatementTree, exprs: Vec<Expr>) -> StatementId {
        let leaf = tree.add(StatementKind::Basic {
            block: BlockId::new(0),
        });
        tree.stmt_mut(leaf).exprs = exprs;
        let root = tree.root();
        tree.attach(root, leaf);
        leaf
    }

    fn plus_one(var: VarRef) -> Expr {
        Expr::assign(
            var,
            Expr::Function {
                kind: FunctionKind::Binary(BinaryOp::Add),
                operands: vec![Expr::Var(var), Expr::Const(ConstValue::Int(1))],
            },
        )
    }

    #[test]
    fn add_one_becomes_increment() {
        let mut tree = StatementTree::new();
        let var = VarRef::local(2);
        let leaf = make_leaf(&mut tree, vec![plus_one(var)]);

        assert!(fold_increments(&mut tree));
        assert_eq!(
            tree.stmt(leaf).exprs[0],
            Expr::Function {
                kind: FunctionKind::IncDec { delta: 1 },
                operands: vec![Expr::Var(var)],
            }
        );
        // A folded expression no longer matches; the pass converges.
        assert!(!fold_increments(&mut tree));
    }

    #[test]
    fn sub_one_becomes_decrement() {
        let mut tree = StatementTree::new();
        let var = VarRef::local(0);
        let leaf = make_leaf(
            &mut tree,
            vec![Expr::assign(
                var,
                Expr::Function {
                    kind: FunctionKind::Binary(BinaryOp::Sub),
                    operands: vec![Expr::Var(var), Expr::Const(ConstValue::Int(1))],
                },
            )],
        );

        assert!(fold_increments(&mut tree));
        assert_eq!(
            tree.stmt(leaf).exprs[0],
            Expr::Function {
                kind: FunctionKind::IncDec { delta: -1 },
                operands: vec![Expr::Var(var)],
            }
        );
    }

    #[test]
    fn other_shapes_are_left_alone() {
        let mut tree = StatementTree::new();
        let x = VarRef::local(1);
        let y = VarRef::local(2);
        let leaf = make_leaf(
            &mut tree,
            vec![
                // x = y + 1: different variable.
                Expr::assign(
                    x,
                    Expr::Function {
                        kind: FunctionKind::Binary(BinaryOp::Add),
                        operands: vec![Expr::Var(y), Expr::Const(ConstValue::Int(1))],
                    },
                ),
                // x = x + 2: wrong constant.
                Expr::assign(
                    x,
                    Expr::Function {
                        kind: FunctionKind::Binary(BinaryOp::Add),
                        operands: vec![Expr::Var(x), Expr::Const(ConstValue::Int(2))],
                    },
                ),
                // x = x * 1: wrong operator.
                Expr::assign(
                    x,
                    Expr::Function {
                        kind: FunctionKind::Binary(BinaryOp::Mul),
                        operands: vec![Expr::Var(x), Expr::Const(ConstValue::Int(1))],
                    },
                ),
            ],
        );

        assert!(!fold_increments(&mut tree));
        assert_eq!(tree.stmt(leaf).exprs.len(), 3);
    }
}
