//! Stack-to-expression lifting.
//!
//! Each `Basic` leaf's instructions are interpreted against a local abstract
//! operand stack. Values that cross a block boundary are materialized into
//! synthetic stack variables whose id is `stack_base + depth`, so every
//! predecessor of a join writes the same temporary and every successor reads
//! it back. Stack underflow or an entry-depth mismatch is a fatal
//! [`Error::InconsistentStack`](crate::Error::InconsistentStack).

use std::collections::HashMap;

use crate::{
    bytecode::{ConstValue, InvokeKind, Opcode},
    cfg::{BlockId, CfgEdgeKind, ControlFlowGraph},
    expr::{ExitKind, Expr, FieldRef, FunctionKind, VarRef},
    stmt::StatementTree,
    Error, Result,
};

/// Lifts every `Basic` leaf of `tree` into an expression list.
///
/// `stack_base` is the first variable id available for stack temporaries
/// (the method's local-slot count).
///
/// # Errors
///
/// Returns [`Error::InconsistentStack`] on operand-stack underflow or when
/// two control flow paths reach a block with different stack depths.
pub fn process_tree(
    graph: &ControlFlowGraph,
    tree: &mut StatementTree,
    stack_base: u32,
) -> Result<()> {
    let depths = entry_depths(graph)?;
    for leaf in tree.basic_leaves() {
        let block = match tree.stmt(leaf).kind {
            crate::stmt::StatementKind::Basic { block } => block,
            _ => continue,
        };
        let entry_depth = depths.get(&block).copied().unwrap_or(0);
        let exprs = lift_block(graph, block, entry_depth, stack_base)?;
        tree.stmt_mut(leaf).exprs = exprs;
    }
    Ok(())
}

/// Computes the operand-stack depth at entry of every reachable block.
///
/// Handler blocks start at depth 1 (the caught exception); everything else
/// is propagated forward over regular edges from the entry at depth 0.
fn entry_depths(graph: &ControlFlowGraph) -> Result<HashMap<BlockId, usize>> {
    let mut depths: HashMap<BlockId, usize> = HashMap::new();
    let mut worklist: Vec<BlockId> = Vec::new();

    depths.insert(graph.entry(), 0);
    worklist.push(graph.entry());
    for range in graph.live_ranges() {
        if depths.insert(range.handler, 1).is_none() {
            worklist.push(range.handler);
        }
    }

    while let Some(block) = worklist.pop() {
        let depth_in = depths[&block];
        let depth_out = simulate_depth(graph, block, depth_in)?;
        for edge in graph.successors(block) {
            if edge.kind != CfgEdgeKind::Regular || Some(edge.target) == graph.exit() {
                continue;
            }
            match depths.get(&edge.target) {
                None => {
                    depths.insert(edge.target, depth_out);
                    worklist.push(edge.target);
                }
                Some(&existing) if existing != depth_out => {
                    return Err(Error::InconsistentStack {
                        block: edge.target.index(),
                        message: format!(
                            "entry depth {existing} from one path, {depth_out} from {block}"
                        ),
                    });
                }
                Some(_) => {}
            }
        }
    }
    Ok(depths)
}

fn simulate_depth(graph: &ControlFlowGraph, block: BlockId, entry: usize) -> Result<usize> {
    let mut depth = entry as isize;
    for instr in &graph.block(block).instructions {
        let (pops, pushes) = stack_effect(&instr.opcode);
        depth -= pops as isize;
        if depth < 0 {
            return Err(Error::InconsistentStack {
                block: block.index(),
                message: format!("underflow at offset {}", instr.offset),
            });
        }
        depth += pushes as isize;
    }
    Ok(depth as usize)
}

fn stack_effect(opcode: &Opcode) -> (usize, usize) {
    match opcode {
        Opcode::Nop | Opcode::Goto { .. } | Opcode::Jsr { .. } | Opcode::Ret { .. } => (0, 0),
        Opcode::Const(_) | Opcode::Load { .. } | Opcode::New { .. } => (0, 1),
        Opcode::Store { .. }
        | Opcode::Pop
        | Opcode::If { .. }
        | Opcode::Switch { .. }
        | Opcode::Athrow
        | Opcode::MonitorEnter
        | Opcode::MonitorExit
        | Opcode::PutStatic { .. } => (1, 0),
        Opcode::ArrayLoad | Opcode::Binary(_) => (2, 1),
        Opcode::ArrayStore => (3, 0),
        Opcode::ArrayLength
        | Opcode::Unary(_)
        | Opcode::GetField { .. }
        | Opcode::NewArray { .. }
        | Opcode::CheckCast { .. }
        | Opcode::InstanceOf { .. } => (1, 1),
        Opcode::Dup => (1, 2),
        Opcode::DupX1 => (2, 3),
        Opcode::Swap => (2, 2),
        Opcode::Iinc { .. } => (0, 0),
        Opcode::IfCmp { .. } | Opcode::PutField { .. } => (2, 0),
        Opcode::GetStatic { .. } => (0, 1),
        Opcode::Return { with_value } => (usize::from(*with_value), 0),
        Opcode::Invoke {
            kind,
            argc,
            returns,
            ..
        } => {
            let receiver = usize::from(!matches!(kind, InvokeKind::Static | InvokeKind::Dynamic));
            (argc + receiver, usize::from(*returns))
        }
    }
}

struct Lifter {
    block: BlockId,
    stack: Vec<Expr>,
    out: Vec<Expr>,
    stack_base: u32,
}

impl Lifter {
    fn pop(&mut self, what: &str) -> Result<Expr> {
        self.stack.pop().ok_or_else(|| Error::InconsistentStack {
            block: self.block.index(),
            message: format!("underflow popping {what}"),
        })
    }

    fn stack_var(&self, depth: usize) -> VarRef {
        VarRef::stack(self.stack_base + depth as u32)
    }
}

fn lift_block(
    graph: &ControlFlowGraph,
    block: BlockId,
    entry_depth: usize,
    stack_base: u32,
) -> Result<Vec<Expr>> {
    let mut lifter = Lifter {
        block,
        stack: Vec::new(),
        out: Vec::new(),
        stack_base,
    };
    for depth in 0..entry_depth {
        lifter.stack.push(Expr::Var(lifter.stack_var(depth)));
    }

    for instr in &graph.block(block).instructions {
        lift_instruction(&mut lifter, &instr.opcode)?;
    }

    // Values surviving the block are materialized into stack temporaries so
    // successors can pick them up by depth.
    let leftovers: Vec<Expr> = lifter.stack.drain(..).collect();
    for (depth, expr) in leftovers.into_iter().enumerate() {
        let var = lifter.stack_var(depth);
        if expr == Expr::Var(var) {
            continue;
        }
        lifter.out.push(Expr::assign(var, expr));
    }
    Ok(lifter.out)
}

#[allow(clippy::too_many_lines)]
fn lift_instruction(lifter: &mut Lifter, opcode: &Opcode) -> Result<()> {
    match opcode {
        Opcode::Nop | Opcode::Goto { .. } | Opcode::Jsr { .. } | Opcode::Ret { .. } => {}
        Opcode::Const(value) => lifter.stack.push(Expr::Const(value.clone())),
        Opcode::Load { slot } => lifter.stack.push(Expr::Var(VarRef::local(*slot))),
        Opcode::Store { slot } => {
            let value = lifter.pop("store operand")?;
            lifter.out.push(Expr::assign(VarRef::local(*slot), value));
        }
        Opcode::ArrayLoad => {
            let index = lifter.pop("array index")?;
            let array = lifter.pop("array")?;
            lifter.stack.push(Expr::ArrayAccess {
                array: Box::new(array),
                index: Box::new(index),
            });
        }
        Opcode::ArrayStore => {
            let value = lifter.pop("stored value")?;
            let index = lifter.pop("array index")?;
            let array = lifter.pop("array")?;
            lifter.out.push(Expr::Assignment {
                target: Box::new(Expr::ArrayAccess {
                    array: Box::new(array),
                    index: Box::new(index),
                }),
                value: Box::new(value),
                op: None,
            });
        }
        Opcode::ArrayLength => {
            let array = lifter.pop("array")?;
            lifter.stack.push(Expr::Function {
                kind: FunctionKind::ArrayLength,
                operands: vec![array],
            });
        }
        Opcode::Pop => {
            let value = lifter.pop("popped value")?;
            // Discarded call results still execute.
            if matches!(value, Expr::Invocation { .. } | Expr::New { .. }) {
                lifter.out.push(value);
            }
        }
        Opcode::Dup => {
            let top = lifter.pop("dup operand")?;
            lifter.stack.push(top.clone());
            lifter.stack.push(top);
        }
        Opcode::DupX1 => {
            let a = lifter.pop("dup_x1 top")?;
            let b = lifter.pop("dup_x1 under")?;
            lifter.stack.push(a.clone());
            lifter.stack.push(b);
            lifter.stack.push(a);
        }
        Opcode::Swap => {
            let a = lifter.pop("swap top")?;
            let b = lifter.pop("swap under")?;
            lifter.stack.push(a);
            lifter.stack.push(b);
        }
        Opcode::Binary(op) => {
            let right = lifter.pop("rhs")?;
            let left = lifter.pop("lhs")?;
            lifter.stack.push(Expr::Function {
                kind: FunctionKind::Binary(*op),
                operands: vec![left, right],
            });
        }
        Opcode::Unary(op) => {
            let operand = lifter.pop("operand")?;
            lifter.stack.push(Expr::Function {
                kind: FunctionKind::Unary(*op),
                operands: vec![operand],
            });
        }
        Opcode::Iinc { slot, delta } => {
            let var = VarRef::local(*slot);
            lifter.out.push(Expr::assign(
                var,
                Expr::Function {
                    kind: FunctionKind::Binary(crate::bytecode::BinaryOp::Add),
                    operands: vec![Expr::Var(var), Expr::Const(ConstValue::Int(i64::from(*delta)))],
                },
            ));
        }
        Opcode::If { cond, .. } => {
            let value = lifter.pop("branch operand")?;
            lifter.out.push(Expr::Branch {
                condition: Box::new(Expr::Function {
                    kind: FunctionKind::Compare(*cond),
                    operands: vec![value, Expr::Const(ConstValue::Int(0))],
                }),
            });
        }
        Opcode::IfCmp { cond, .. } => {
            let right = lifter.pop("branch rhs")?;
            let left = lifter.pop("branch lhs")?;
            lifter.out.push(Expr::Branch {
                condition: Box::new(Expr::Function {
                    kind: FunctionKind::Compare(*cond),
                    operands: vec![left, right],
                }),
            });
        }
        Opcode::Switch { .. } => {
            let selector = lifter.pop("switch selector")?;
            lifter.out.push(Expr::SwitchHead {
                selector: Box::new(selector),
            });
        }
        Opcode::Return { with_value } => {
            let value = if *with_value {
                Some(Box::new(lifter.pop("return value")?))
            } else {
                None
            };
            lifter.out.push(Expr::Exit {
                kind: ExitKind::Return,
                value,
            });
        }
        Opcode::Athrow => {
            let value = lifter.pop("thrown value")?;
            lifter.out.push(Expr::Exit {
                kind: ExitKind::Throw,
                value: Some(Box::new(value)),
            });
        }
        Opcode::GetField { class, name } => {
            let receiver = lifter.pop("field receiver")?;
            lifter.stack.push(Expr::Field {
                field: FieldRef {
                    class: class.clone(),
                    name: name.clone(),
                    is_static: false,
                },
                receiver: Some(Box::new(receiver)),
            });
        }
        Opcode::PutField { class, name } => {
            let value = lifter.pop("stored value")?;
            let receiver = lifter.pop("field receiver")?;
            lifter.out.push(Expr::Assignment {
                target: Box::new(Expr::Field {
                    field: FieldRef {
                        class: class.clone(),
                        name: name.clone(),
                        is_static: false,
                    },
                    receiver: Some(Box::new(receiver)),
                }),
                value: Box::new(value),
                op: None,
            });
        }
        Opcode::GetStatic { class, name } => {
            lifter.stack.push(Expr::Field {
                field: FieldRef {
                    class: class.clone(),
                    name: name.clone(),
                    is_static: true,
                },
                receiver: None,
            });
        }
        Opcode::PutStatic { class, name } => {
            let value = lifter.pop("stored value")?;
            lifter.out.push(Expr::Assignment {
                target: Box::new(Expr::Field {
                    field: FieldRef {
                        class: class.clone(),
                        name: name.clone(),
                        is_static: true,
                    },
                    receiver: None,
                }),
                value: Box::new(value),
                op: None,
            });
        }
        Opcode::Invoke {
            kind,
            class,
            name,
            argc,
            returns,
        } => {
            let mut args = Vec::with_capacity(*argc);
            for _ in 0..*argc {
                args.push(lifter.pop("call argument")?);
            }
            args.reverse();
            let receiver = if matches!(kind, InvokeKind::Static | InvokeKind::Dynamic) {
                None
            } else {
                Some(lifter.pop("call receiver")?)
            };

            // Fold `new C; dup; invokespecial <init>` into a constructor call:
            // the dup'd copy left on the stack becomes the constructed value.
            if *kind == InvokeKind::Special && name == "<init>" {
                if let Some(Expr::New { class: new_class, args: ctor_args }) = receiver.clone() {
                    if ctor_args.is_empty() {
                        let constructed = Expr::New {
                            class: new_class.clone(),
                            args,
                        };
                        let placeholder = Expr::New {
                            class: new_class,
                            args: Vec::new(),
                        };
                        if let Some(slot) =
                            lifter.stack.iter_mut().rev().find(|e| **e == placeholder)
                        {
                            *slot = constructed;
                        } else {
                            lifter.out.push(constructed);
                        }
                        return Ok(());
                    }
                }
            }

            let invocation = Expr::Invocation {
                kind: *kind,
                class: class.clone(),
                name: name.clone(),
                receiver: receiver.map(Box::new),
                args,
            };
            if *returns {
                lifter.stack.push(invocation);
            } else {
                lifter.out.push(invocation);
            }
        }
        Opcode::New { class } => {
            lifter.stack.push(Expr::New {
                class: class.clone(),
                args: Vec::new(),
            });
        }
        Opcode::NewArray { element } => {
            let length = lifter.pop("array length")?;
            lifter.stack.push(Expr::NewArray {
                element: element.clone(),
                length: Box::new(length),
            });
        }
        Opcode::CheckCast { class } => {
            let value = lifter.pop("cast operand")?;
            lifter.stack.push(Expr::Function {
                kind: FunctionKind::Cast(class.clone()),
                operands: vec![value],
            });
        }
        Opcode::InstanceOf { class } => {
            let value = lifter.pop("instanceof operand")?;
            lifter.stack.push(Expr::Function {
                kind: FunctionKind::InstanceOf(class.clone()),
                operands: vec![value],
            });
        }
        Opcode::MonitorEnter => {
            let object = lifter.pop("monitor object")?;
            lifter.out.push(Expr::Monitor {
                enter: true,
                object: Box::new(object),
            });
        }
        Opcode::MonitorExit => {
            let object = lifter.pop("monitor object")?;
            lifter.out.push(Expr::Monitor {
                enter: false,
                object: Box::new(object),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BinaryOp, Comparison, Instruction};

    fn lift(instructions: Vec<Opcode>) -> Result<Vec<Expr>> {
        let mut graph = ControlFlowGraph::new();
        let block = graph.add_block(
            instructions
                .into_iter()
                .enumerate()
                .map(|(i, op)| Instruction::new(i as u32, op))
                .collect(),
        );
        lift_block(&graph, block, 0, 10)
    }

    #[test]
    fn add_and_store_becomes_assignment() {
        // iload 0; iload 1; iadd; istore 2
        let exprs = lift(vec![
            Opcode::Load { slot: 0 },
            Opcode::Load { slot: 1 },
            Opcode::Binary(BinaryOp::Add),
            Opcode::Store { slot: 2 },
        ])
        .unwrap();

        assert_eq!(exprs.len(), 1);
        let Expr::Assignment { target, value, .. } = &exprs[0] else {
            panic!("expected assignment, got {:?}", exprs[0]);
        };
        assert!(matches!(target.as_ref(), Expr::Var(v) if v.id == 2));
        assert!(matches!(
            value.as_ref(),
            Expr::Function { kind: FunctionKind::Binary(BinaryOp::Add), .. }
        ));
    }

    #[test]
    fn branch_lifts_to_trailing_condition() {
        let exprs = lift(vec![
            Opcode::Load { slot: 0 },
            Opcode::Const(ConstValue::Int(10)),
            Opcode::IfCmp {
                cond: Comparison::Lt,
                target: 0,
            },
        ])
        .unwrap();

        assert_eq!(exprs.len(), 1);
        assert!(matches!(&exprs[0], Expr::Branch { .. }));
    }

    #[test]
    fn leftover_stack_is_materialized() {
        let exprs = lift(vec![Opcode::Const(ConstValue::Int(42))]).unwrap();
        assert_eq!(exprs.len(), 1);
        let var = exprs[0].assigned_var().unwrap();
        assert_eq!(var.id, 10); // stack_base
        assert_eq!(var.origin, crate::expr::VarOrigin::Stack);
    }

    #[test]
    fn constructor_call_folds_into_new() {
        // new C; dup; iconst 5; invokespecial C.<init>(I)V; astore 1
        let exprs = lift(vec![
            Opcode::New {
                class: "C".into(),
            },
            Opcode::Dup,
            Opcode::Const(ConstValue::Int(5)),
            Opcode::Invoke {
                kind: InvokeKind::Special,
                class: "C".into(),
                name: "<init>".into(),
                argc: 1,
                returns: false,
            },
            Opcode::Store { slot: 1 },
        ])
        .unwrap();

        assert_eq!(exprs.len(), 1);
        let Expr::Assignment { value, .. } = &exprs[0] else {
            panic!("expected assignment");
        };
        let Expr::New { class, args } = value.as_ref() else {
            panic!("expected folded constructor, got {value:?}");
        };
        assert_eq!(class, "C");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn underflow_is_inconsistent_stack() {
        let result = lift(vec![Opcode::Store { slot: 0 }]);
        assert!(matches!(result, Err(Error::InconsistentStack { .. })));
    }

    #[test]
    fn entry_depth_mismatch_is_detected() {
        // Block 0 pushes one value and branches to 2; block 1 pushes nothing
        // and also reaches 2.
        let mut graph = ControlFlowGraph::new();
        let a = graph.add_block(vec![Instruction::new(0, Opcode::Const(ConstValue::Int(1)))]);
        let b = graph.add_block(vec![Instruction::new(1, Opcode::Nop)]);
        let join = graph.add_block(vec![Instruction::new(2, Opcode::Nop)]);
        graph.add_edge(a, crate::cfg::CfgEdge::regular(b)).unwrap();
        graph.add_edge(a, crate::cfg::CfgEdge::regular(join)).unwrap();
        graph.add_edge(b, crate::cfg::CfgEdge::regular(join)).unwrap();

        let result = entry_depths(&graph);
        assert!(matches!(result, Err(Error::InconsistentStack { .. })));
    }
}
