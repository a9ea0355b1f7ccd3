//! CFG construction from a linear instruction sequence.
//!
//! Partitions the sequence into maximal straight-line runs: a new block
//! starts at the method entry, at every branch target, after every block
//! terminator, and at every exception-range boundary (start, end, handler).
//! Every instruction ends up in exactly one block.

use std::collections::{BTreeSet, HashMap};

use crate::{
    bytecode::MethodCode,
    cfg::{BlockId, CfgEdge, ControlFlowGraph},
    Result,
};

/// Builds the initial control flow graph for a method.
///
/// # Errors
///
/// Returns [`Error::MalformedBytecode`](crate::Error::MalformedBytecode)
/// when a branch target or exception-table offset does not land on an
/// instruction boundary (the method end offset is permitted for exception
/// range ends).
pub fn build_graph(code: &MethodCode) -> Result<ControlFlowGraph> {
    if code.instructions.is_empty() {
        return Err(malformed_error!("method {} has an empty body", code.id));
    }

    let end_offset = {
        let last = &code.instructions[code.instructions.len() - 1];
        last.offset + 1
    };
    let offsets: HashMap<u32, usize> = code
        .instructions
        .iter()
        .enumerate()
        .map(|(idx, instr)| (instr.offset, idx))
        .collect();

    let instruction_index = |offset: u32, what: &str| -> Result<usize> {
        offsets.get(&offset).copied().ok_or_else(|| {
            malformed_error!("{what} offset {offset} in {} is not an instruction", code.id)
        })
    };

    // Leader analysis: every leader offset starts a block.
    let mut leaders: BTreeSet<usize> = BTreeSet::new();
    leaders.insert(0);
    for (idx, instr) in code.instructions.iter().enumerate() {
        for target in instr.branch_targets() {
            leaders.insert(instruction_index(target, "branch target")?);
        }
        if instr.is_block_terminator() && idx + 1 < code.instructions.len() {
            leaders.insert(idx + 1);
        }
    }
    for entry in &code.exceptions {
        leaders.insert(instruction_index(entry.start, "exception range start")?);
        if entry.end < end_offset {
            leaders.insert(instruction_index(entry.end, "exception range end")?);
        }
        leaders.insert(instruction_index(entry.handler, "exception handler")?);
    }

    // Slice the sequence into blocks at the leaders.
    let mut graph = ControlFlowGraph::new();
    let leader_list: Vec<usize> = leaders.iter().copied().collect();
    let mut block_of_instr: Vec<BlockId> = vec![BlockId::new(0); code.instructions.len()];
    for (pos, &start) in leader_list.iter().enumerate() {
        let end = leader_list
            .get(pos + 1)
            .copied()
            .unwrap_or(code.instructions.len());
        let id = graph.add_block(code.instructions[start..end].to_vec());
        for slot in &mut block_of_instr[start..end] {
            *slot = id;
        }
    }

    // Regular edges: explicit targets first (so a conditional block's first
    // successor is its branch target), then fall-through.
    for id in graph.live_ids().collect::<Vec<_>>() {
        let Some(term) = graph.block(id).terminator().cloned() else {
            continue;
        };
        let last_idx = offsets[&term.offset];
        for target in term.branch_targets() {
            let target_block = block_of_instr[offsets[&target]];
            graph.add_edge(id, CfgEdge::regular(target_block))?;
        }
        if term.falls_through() && last_idx + 1 < code.instructions.len() {
            let next_block = block_of_instr[last_idx + 1];
            graph.add_edge(id, CfgEdge::regular(next_block))?;
        }
    }

    // Protected ranges and their exception edges: every block in the range
    // body gets an edge to the handler block.
    for entry in &code.exceptions {
        let start_idx = offsets[&entry.start];
        let end_idx = if entry.end < end_offset {
            offsets[&entry.end]
        } else {
            code.instructions.len()
        };
        let handler_block = block_of_instr[offsets[&entry.handler]];

        let mut body: Vec<BlockId> = Vec::new();
        for idx in start_idx..end_idx {
            let block = block_of_instr[idx];
            if body.last() != Some(&block) {
                body.push(block);
            }
        }
        let range = graph.add_range(body.clone(), handler_block, entry.exception_type.clone());
        for block in body {
            graph.add_edge(block, CfgEdge::exception(handler_block, range))?;
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{
        Comparison, ConstValue, ExceptionEntry, Instruction, MethodFlags, MethodId, Opcode,
    };

    fn make_code(instructions: Vec<Instruction>) -> MethodCode {
        MethodCode::new(
            MethodId::new("Test", "m", "()V"),
            MethodFlags::PUBLIC,
            instructions,
        )
    }

    #[test]
    fn linear_sequence_is_one_block() {
        let code = make_code(vec![
            Instruction::new(0, Opcode::Const(ConstValue::Int(1))),
            Instruction::new(1, Opcode::Store { slot: 0 }),
            Instruction::new(2, Opcode::Return { with_value: false }),
        ]);

        let graph = build_graph(&code).unwrap();
        assert_eq!(graph.live_count(), 1);
        assert_eq!(graph.block(graph.entry()).instructions.len(), 3);
    }

    #[test]
    fn conditional_splits_at_target_and_fallthrough() {
        // 0: iload 0
        // 1: ifeq -> 4
        // 2: iconst 1
        // 3: istore 1
        // 4: return
        let code = make_code(vec![
            Instruction::new(0, Opcode::Load { slot: 0 }),
            Instruction::new(
                1,
                Opcode::If {
                    cond: Comparison::Eq,
                    target: 4,
                },
            ),
            Instruction::new(2, Opcode::Const(ConstValue::Int(1))),
            Instruction::new(3, Opcode::Store { slot: 1 }),
            Instruction::new(4, Opcode::Return { with_value: false }),
        ]);

        let graph = build_graph(&code).unwrap();
        assert_eq!(graph.live_count(), 3);

        // Branch target first, fall-through second.
        let succs: Vec<_> = graph.regular_successors(graph.entry()).collect();
        assert_eq!(succs.len(), 2);
        assert_eq!(graph.block(succs[0]).start_offset(), Some(4));
        assert_eq!(graph.block(succs[1]).start_offset(), Some(2));
    }

    #[test]
    fn exception_range_produces_exception_edges() {
        // try { 0..2 } catch -> 3
        let mut code = make_code(vec![
            Instruction::new(0, Opcode::Const(ConstValue::Int(1))),
            Instruction::new(1, Opcode::Store { slot: 0 }),
            Instruction::new(2, Opcode::Return { with_value: false }),
            Instruction::new(3, Opcode::Athrow),
        ]);
        code.exceptions.push(ExceptionEntry {
            start: 0,
            end: 2,
            handler: 3,
            exception_type: Some("java/lang/Exception".into()),
        });

        let graph = build_graph(&code).unwrap();
        let ranges: Vec<_> = graph.live_ranges().collect();
        assert_eq!(ranges.len(), 1);

        let handler = ranges[0].handler;
        assert_eq!(graph.block(handler).start_offset(), Some(3));
        assert!(graph
            .predecessors(handler)
            .iter()
            .all(|&p| ranges[0].protects(p)));
    }

    #[test]
    fn branch_outside_method_is_malformed() {
        let code = make_code(vec![Instruction::new(0, Opcode::Goto { target: 99 })]);
        let result = build_graph(&code);
        assert!(matches!(
            result,
            Err(crate::Error::MalformedBytecode { .. })
        ));
    }

    #[test]
    fn every_instruction_in_exactly_one_block() {
        let code = make_code(vec![
            Instruction::new(0, Opcode::Load { slot: 0 }),
            Instruction::new(
                1,
                Opcode::If {
                    cond: Comparison::Ne,
                    target: 3,
                },
            ),
            Instruction::new(2, Opcode::Nop),
            Instruction::new(3, Opcode::Return { with_value: false }),
        ]);

        let graph = build_graph(&code).unwrap();
        let total: usize = graph.live_blocks().map(|b| b.instructions.len()).sum();
        assert_eq!(total, 4);
    }
}
