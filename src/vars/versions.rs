//! Version assignment.
//!
//! Every assignment to a variable opens a new version; reads pick up the
//! most recent version seen in tree order. This is a per-definition
//! numbering, not full SSA: paths that join share the last version the
//! walk encountered, which is sufficient for declaration placement and
//! the increment folding that runs on top of it.

use std::collections::HashMap;

use crate::{
    bytecode::ConstValue,
    expr::Expr,
    stmt::StatementTree,
    vars::{VarProcessor, VarType},
};

/// Renumbers every variable reference in the tree and records version
/// types. Runs from scratch on each call.
pub fn set_versions(tree: &mut StatementTree, vars: &mut VarProcessor) {
    let mut current: HashMap<u32, u32> = HashMap::new();
    for leaf in tree.basic_leaves() {
        let mut exprs = std::mem::take(&mut tree.stmt_mut(leaf).exprs);
        for expr in &mut exprs {
            visit(expr, &mut current, vars);
        }
        tree.stmt_mut(leaf).exprs = exprs;
    }
}

fn visit(expr: &mut Expr, current: &mut HashMap<u32, u32>, vars: &mut VarProcessor) {
    match expr {
        Expr::Var(v) => {
            v.version = current.get(&v.id).copied().unwrap_or(0);
        }
        Expr::Assignment { target, value, .. } => {
            // The value is evaluated before the definition takes effect.
            visit(value, current, vars);
            if let Expr::Var(v) = target.as_mut() {
                let version = current.entry(v.id).or_insert(0);
                *version += 1;
                v.version = *version;
                vars.record_type(*v, infer_type(value));
            } else {
                visit(target, current, vars);
            }
        }
        other => {
            for child in other.children_mut_for_versioning() {
                visit(child, current, vars);
            }
        }
    }
}

/// Coarse type of a defining expression.
fn infer_type(expr: &Expr) -> VarType {
    match expr {
        Expr::Const(ConstValue::Int(_)) => VarType::Int,
        Expr::Const(ConstValue::Float(_)) => VarType::Float,
        Expr::Const(ConstValue::Null | ConstValue::Str(_) | ConstValue::Class(_))
        | Expr::New { .. }
        | Expr::NewArray { .. } => VarType::Reference,
        Expr::Function { operands, .. } => operands
            .first()
            .map_or(VarType::Unknown, infer_type),
        Expr::Var(_) | Expr::Assignment { .. } => VarType::Unknown,
        _ => VarType::Unknown,
    }
}

impl Expr {
    /// Children in evaluation order for the versioning walk. Identical to
    /// the generic child list; assignments are handled by the caller.
    fn children_mut_for_versioning(&mut self) -> Vec<&mut Expr> {
        match self {
            Self::Const(_) | Self::Var(_) | Self::Assignment { .. } => Vec::new(),
            Self::Field { receiver, .. } => receiver.iter_mut().map(Box::as_mut).collect(),
            Self::ArrayAccess { array, index } => vec![array, index],
            Self::Invocation { receiver, args, .. } => {
                let mut out: Vec<&mut Expr> = receiver.iter_mut().map(Box::as_mut).collect();
                out.extend(args.iter_mut());
                out
            }
            Self::New { args, .. } => args.iter_mut().collect(),
            Self::NewArray { length, .. } => vec![length],
            Self::Function { operands, .. } => operands.iter_mut().collect(),
            Self::Branch { condition } => vec![condition],
            Self::SwitchHead { selector } => vec![selector],
            Self::Exit { value, .. } => value.iter_mut().map(Box::as_mut).collect(),
            Self::Monitor { object, .. } => vec![object],
        }
    }
}
