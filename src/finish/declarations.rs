//! Variable declaration placement.

use std::collections::HashMap;

use crate::{
    expr::{Expr, VarOrigin, VarRef},
    stmt::{StatementId, StatementTree},
    vars::VarProcessor,
};

/// Assigns each versioned local the innermost statement enclosing all of
/// its occurrences; the renderer declares the variable there.
pub fn place_declarations(tree: &StatementTree, vars: &mut VarProcessor) {
    let mut occurrences: HashMap<VarRef, Vec<StatementId>> = HashMap::new();
    for leaf in tree.basic_leaves() {
        for expr in &tree.stmt(leaf).exprs {
            expr.visit(&mut |e| {
                if let Expr::Var(v) = e {
                    if v.origin == VarOrigin::Local {
                        occurrences.entry(*v).or_default().push(leaf);
                    }
                }
            });
        }
    }

    let mut ordered: Vec<_> = occurrences.into_iter().collect();
    ordered.sort_by_key(|(v, _)| (v.id, v.version));
    for (var, leaves) in ordered {
        let Some(mut scope) = leaves.first().copied() else {
            continue;
        };
        for &leaf in &leaves[1..] {
            scope = lowest_common_ancestor(tree, scope, leaf);
        }
        vars.set_declaration(var, scope);
    }
}

fn lowest_common_ancestor(tree: &StatementTree, a: StatementId, b: StatementId) -> StatementId {
    tree.ancestors(a)
        .find(|&anc| tree.contains(anc, b))
        .unwrap_or_else(|| tree.root())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::ConstValue,
        cfg::BlockId,
        stmt::{IfKind, StatementKind},
    };

    fn make_leaf(tree: &mut StatementTree, parent: StatementId, block: usize) -> StatementId {
        let leaf = tree.add(StatementKind::Basic {
            block: BlockId::new(block),
        });
        tree.attach(parent, leaf);
        leaf
    }

    #[test]
    fn single_leaf_variable_declares_in_that_leaf() {
        let mut tree = StatementTree::new();
        let body = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), body);
        let leaf = make_leaf(&mut tree, body, 0);
        let v = VarRef {
            version: 1,
            ..VarRef::local(1)
        };
        tree.stmt_mut(leaf).exprs = vec![Expr::assign(v, Expr::Const(ConstValue::Int(1)))];

        let mut vars = VarProcessor::new(2);
        place_declarations(&tree, &mut vars);
        assert_eq!(vars.declaration(v), Some(leaf));
    }

    #[test]
    fn variable_spanning_both_arms_declares_above_the_if() {
        let mut tree = StatementTree::new();
        let body = tree.add(StatementKind::Sequence);
        tree.attach(tree.root(), body);
        let cond = tree.add(StatementKind::If {
            kind: IfKind::IfElse,
        });
        tree.attach(body, cond);
        let _head = make_leaf(&mut tree, cond, 0);
        let then_arm = make_leaf(&mut tree, cond, 1);
        let else_arm = make_leaf(&mut tree, cond, 2);

        let v = VarRef {
            version: 1,
            ..VarRef::local(1)
        };
        tree.stmt_mut(then_arm).exprs = vec![Expr::assign(v, Expr::Const(ConstValue::Int(1)))];
        tree.stmt_mut(else_arm).exprs =
            vec![Expr::assign(VarRef::local(2), Expr::var(v))];

        let mut vars = VarProcessor::new(3);
        place_declarations(&tree, &mut vars);
        assert_eq!(vars.declaration(v), Some(cond));
    }
}
