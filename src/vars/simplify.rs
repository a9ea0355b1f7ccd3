//! Stack-temporary folding.
//!
//! Lifting materializes block-crossing stack values as assignments to
//! synthetic stack variables. A temporary with exactly one definition and
//! exactly one read is folded back into its consumer when the read sits
//! where evaluation order cannot change: the expression immediately after
//! the definition, or the first expression of another leaf.

use crate::{
    expr::{Expr, VarOrigin, VarRef},
    stmt::{StatementId, StatementTree},
};

/// Folds single-use stack temporaries into their consumers. Returns
/// `true` when at least one temporary was eliminated.
pub fn fold_stack_temporaries(tree: &mut StatementTree) -> bool {
    let mut changed = false;
    while fold_one(tree) {
        changed = true;
    }
    changed
}

fn fold_one(tree: &mut StatementTree) -> bool {
    let leaves = tree.basic_leaves();

    for &leaf in &leaves {
        for idx in 0..tree.stmt(leaf).exprs.len() {
            let Some(var) = tree.stmt(leaf).exprs[idx].assigned_var() else {
                continue;
            };
            if var.origin != VarOrigin::Stack {
                continue;
            }
            if count_definitions(tree, &leaves, &var) != 1 {
                continue;
            }
            let Some((use_leaf, use_idx)) = sole_use_site(tree, &leaves, &var) else {
                continue;
            };
            // Substitution is order-safe only right after the definition
            // or at the head of another leaf.
            let adjacent = use_leaf == leaf && use_idx == idx + 1;
            let leading = use_leaf != leaf && use_idx == 0;
            if !adjacent && !leading {
                continue;
            }

            let Expr::Assignment { value, .. } = &tree.stmt(leaf).exprs[idx] else {
                continue;
            };
            let value = value.as_ref().clone();
            if tree.stmt_mut(use_leaf).exprs[use_idx].replace_first_var_use(&var, &value) {
                tree.stmt_mut(leaf).exprs.remove(idx);
                return true;
            }
        }
    }
    false
}

fn count_definitions(tree: &StatementTree, leaves: &[StatementId], var: &VarRef) -> usize {
    leaves
        .iter()
        .flat_map(|&l| &tree.stmt(l).exprs)
        .filter(|e| e.assigned_var().is_some_and(|v| v.same_var(var)))
        .count()
}

/// Position of the only read of `var`, or `None` when the read count is
/// not exactly one.
fn sole_use_site(
    tree: &StatementTree,
    leaves: &[StatementId],
    var: &VarRef,
) -> Option<(StatementId, usize)> {
    let mut site = None;
    let mut total = 0;
    for &leaf in leaves {
        for (idx, expr) in tree.stmt(leaf).exprs.iter().enumerate() {
            let uses = expr.count_var_uses(var);
            if uses > 0 && site.is_none() {
                site = Some((leaf, idx));
            }
            total += uses;
        }
    }
    (total == 1).then_some(site).flatten()
}

/// Number of distinct stack variables still referenced anywhere in the
/// tree; the pipeline's convergence metric.
#[must_use]
pub fn stack_var_count(tree: &StatementTree) -> usize {
    let mut ids = std::collections::HashSet::new();
    for leaf in tree.basic_leaves() {
        for expr in &tree.stmt(leaf).exprs {
            expr.visit(&mut |e| {
                if let Expr::Var(v) = e {
                    if v.origin == VarOrigin::Stack {
                        ids.insert(v.id);
                    }
                }
                if let Some(v) = e.assigned_var() {
                    if v.origin == VarOrigin::Stack {
                        ids.insert(v.id);
                    }
                }
            });
        }
    }
    ids.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::ConstValue,
        cfg::BlockId,
        stmt::StatementKind,
    };

    fn make_leaf(tree: &mut StatementTree, block: usize, exprs: Vec<Expr>) -> StatementId {
        let leaf = tree.add(StatementKind::Basic {
            block: BlockId::new(block),
        });
        tree.stmt_mut(leaf).exprs = exprs;
        let root = tree.root();
        tree.attach(root, leaf);
        leaf
    }

    #[test]
    fn adjacent_temp_is_folded() {
        // s4 = 7; v0 = s4  =>  v0 = 7
        let mut tree = StatementTree::new();
        let temp = VarRef::stack(4);
        let leaf = make_leaf(
            &mut tree,
            0,
            vec![
                Expr::assign(temp, Expr::Const(ConstValue::Int(7))),
                Expr::assign(VarRef::local(0), Expr::var(temp)),
            ],
        );

        assert!(fold_stack_temporaries(&mut tree));
        let exprs = &tree.stmt(leaf).exprs;
        assert_eq!(exprs.len(), 1);
        let Expr::Assignment { value, .. } = &exprs[0] else {
            panic!("expected assignment");
        };
        assert_eq!(value.as_ref(), &Expr::Const(ConstValue::Int(7)));
        assert_eq!(stack_var_count(&tree), 0);
    }

    #[test]
    fn cross_leaf_temp_is_folded_into_leading_expression() {
        let mut tree = StatementTree::new();
        let temp = VarRef::stack(4);
        let producer = make_leaf(
            &mut tree,
            0,
            vec![Expr::assign(temp, Expr::Const(ConstValue::Int(3)))],
        );
        let consumer = make_leaf(
            &mut tree,
            1,
            vec![Expr::assign(VarRef::local(1), Expr::var(temp))],
        );

        assert!(fold_stack_temporaries(&mut tree));
        assert!(tree.stmt(producer).exprs.is_empty());
        let Expr::Assignment { value, .. } = &tree.stmt(consumer).exprs[0] else {
            panic!("expected assignment");
        };
        assert_eq!(value.as_ref(), &Expr::Const(ConstValue::Int(3)));
    }

    #[test]
    fn multiply_defined_temp_is_kept() {
        // Two arms materialize the same slot; folding either would lose
        // the join semantics.
        let mut tree = StatementTree::new();
        let temp = VarRef::stack(4);
        make_leaf(
            &mut tree,
            0,
            vec![Expr::assign(temp, Expr::Const(ConstValue::Int(1)))],
        );
        make_leaf(
            &mut tree,
            1,
            vec![Expr::assign(temp, Expr::Const(ConstValue::Int(2)))],
        );
        make_leaf(
            &mut tree,
            2,
            vec![Expr::assign(VarRef::local(0), Expr::var(temp))],
        );

        assert!(!fold_stack_temporaries(&mut tree));
        assert_eq!(stack_var_count(&tree), 1);
    }

    #[test]
    fn second_read_blocks_folding() {
        let mut tree = StatementTree::new();
        let temp = VarRef::stack(4);
        make_leaf(
            &mut tree,
            0,
            vec![
                Expr::assign(temp, Expr::Const(ConstValue::Int(1))),
                Expr::assign(VarRef::local(0), Expr::var(temp)),
                Expr::assign(VarRef::local(1), Expr::var(temp)),
            ],
        );

        assert!(!fold_stack_temporaries(&mut tree));
    }
}
