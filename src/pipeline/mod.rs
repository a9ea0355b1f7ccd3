//! The per-method decompilation pipeline.
//!
//! [`decompile_method`] runs every pass in its fixed order: CFG
//! construction and normalization, exception deobfuscation, statement
//! tree parsing with finally replication, expression lifting, variable
//! simplification, the structural enhancement fixpoint, and finalization.
//! Each fixpoint carries an iteration ceiling; tripping one is reported
//! as a fatal error rather than looping forever.

mod context;
mod options;
mod worker;

pub use context::{Counters, DecompileContext, Warning, WarningKind, WarningSink};
pub use options::DecompileOptions;
pub use worker::{decompile_all, MethodWorker};

use crate::{
    bytecode::MethodCode,
    cfg::{builder, normalize},
    deob::exceptions,
    enhance::{self, exits, ifs, inline_block, labels, loops, merge, notnull, sequences},
    expr::lift,
    finish,
    stmt::{
        dom_parser,
        finally::{self, FinallyProcessor, MAX_FINALLY_ROUNDS},
        StatementTree,
    },
    vars::{ppmm, simplify, versions, VarProcessor},
    Error, Result,
};

/// Ceiling for the simplify / re-version / fold-increments cycle.
pub const MAX_SIMPLIFY_ROUNDS: usize = 64;

/// The finalized output of one method run: the statement tree and the
/// variable table describing its versioned variables.
#[derive(Debug)]
pub struct Decompiled {
    /// Source-shaped statement tree.
    pub tree: StatementTree,
    /// Variable versions, types and declaration points.
    pub vars: VarProcessor,
}

/// Decompiles one method into a statement tree.
///
/// Fatal conditions ([`Error::MalformedBytecode`],
/// [`Error::InconsistentStack`], tripped fixpoint ceilings) abort this
/// method only; non-fatal findings are reported through `sink` and
/// processing continues best-effort.
///
/// # Errors
/// Returns the first fatal pipeline error; see [`Error`] for the full
/// catalog.
pub fn decompile_method(
    mut code: MethodCode,
    options: DecompileOptions,
    sink: &WarningSink,
) -> Result<Decompiled> {
    let mut ctx = DecompileContext::new(code.id.clone(), options, sink);
    let (mut tree, mut vars) = process_method(&code, &mut ctx)?;

    exits::remove_redundant_returns(&mut tree);
    finish::identify_ternaries(&mut tree);
    finish::identify_compound_assignments(&mut tree);
    finish::place_declarations(&tree, &mut vars);
    // Leaves edge bookkeeping inconsistent; nothing may run after it.
    finish::replace_continue_with_break(&mut tree);

    code.release_resources();
    Ok(Decompiled { tree, vars })
}

/// Runs every pass up to (but not including) finalization, leaving the
/// tree in its settled pre-finalization shape.
fn process_method(
    code: &MethodCode,
    ctx: &mut DecompileContext<'_>,
) -> Result<(StatementTree, VarProcessor)> {
    let mut graph = builder::build_graph(code)?;
    normalize::remove_dead_blocks(&mut graph);
    normalize::inline_jsr(&mut graph)?;
    normalize::connect_exit(&mut graph)?;
    normalize::remove_gotos(&mut graph);

    exceptions::remove_circular_ranges(&mut graph);
    exceptions::restore_pop_ranges(&mut graph);
    if ctx.options.remove_empty_ranges {
        exceptions::remove_empty_ranges(&mut graph);
    }
    if ctx.options.no_exceptions_return {
        normalize::incorporate_value_returns(&mut graph)?;
    }
    exceptions::insert_empty_handlers(&mut graph);

    normalize::merge_blocks(&mut graph)?;

    let mut vars = VarProcessor::new(code.local_slots);
    if exceptions::has_obfuscated_layout(&graph) {
        ctx.warn(
            WarningKind::ObfuscatedExceptionLayout,
            "exception ranges remained irreducible, continuing with best-effort ranges",
        );
    }

    // Every replicated finally invalidates the tree; re-parse until the
    // processor finds nothing left to claim.
    let mut tree = dom_parser::parse(&graph);
    let mut finally_processor = FinallyProcessor::new();
    while finally_processor.iterate(&mut graph, &tree) {
        ctx.counters.finally_rounds += 1;
        if ctx.counters.finally_rounds > MAX_FINALLY_ROUNDS {
            return Err(Error::FinallyLoopNotConverging {
                iterations: ctx.counters.finally_rounds,
            });
        }
        tree = dom_parser::parse(&graph);
    }
    finally::mark_finally(&graph, &mut tree);
    finally::collapse_synchronized(&mut graph, &mut tree);

    sequences::condense_sequences(&mut tree);
    sequences::clear_markers(&mut tree);

    lift::process_tree(&graph, &mut tree, vars.stack_base())?;
    sequences::condense_sequences(&mut tree);

    simplify_vars(&mut tree, &mut vars, ctx)?;

    enhance::normalize_conditions(&graph, &mut tree);
    let is_static_initializer = code.is_static_initializer();
    let mut stripped_guards = false;
    loop {
        ctx.counters.enhance_rounds += 1;
        let mut changed = labels::cleanup_edges(&mut tree);
        changed |= sequences::condense_sequences(&mut tree);
        loop {
            changed |= merge::enhance_loops(&mut tree);
            let again = loops::extract_loops(&mut tree) | ifs::merge_all_ifs(&mut tree);
            changed |= again;
            if !again {
                break;
            }
        }
        if ctx.options.not_null_annotations
            && !stripped_guards
            && notnull::remove_not_null_checks(&mut tree)
        {
            stripped_guards = true;
            simplify_vars(&mut tree, &mut vars, ctx)?;
            changed = true;
        }
        changed |= labels::identify_labels(&mut tree);
        // Inlining reshapes the tree enough to restart the whole suite.
        if inline_block::inline_single_blocks(&mut tree) {
            continue;
        }
        // Initializers must keep their single return point untouched.
        if !is_static_initializer {
            changed |= exits::condense_exits(&mut tree);
        }
        if !changed {
            break;
        }
    }

    Ok((tree, vars))
}

/// Fold stack temporaries, refresh versions, fold increments; repeats as
/// long as the increment folder keeps matching.
fn simplify_vars(
    tree: &mut StatementTree,
    vars: &mut VarProcessor,
    ctx: &mut DecompileContext<'_>,
) -> Result<()> {
    loop {
        simplify::fold_stack_temporaries(tree);
        versions::set_versions(tree, vars);
        if !ppmm::fold_increments(tree) {
            return Ok(());
        }
        ctx.counters.simplify_rounds += 1;
        if ctx.counters.simplify_rounds > MAX_SIMPLIFY_ROUNDS {
            return Err(Error::VarSimplifyNotConverging {
                iterations: ctx.counters.simplify_rounds,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{
        BinaryOp, Comparison, ConstValue, Instruction, MethodFlags, MethodId, Opcode,
    };

    fn make_code(instructions: Vec<Instruction>) -> MethodCode {
        let mut code = MethodCode::new(
            MethodId::new("com/example/Sample", "settled", "()V"),
            MethodFlags::PUBLIC,
            instructions,
        );
        code.local_slots = 1;
        code
    }

    #[test]
    fn settled_tree_reports_no_further_changes() {
        // int i = 0; while (i < 10) { i = i + 2; }
        let code = make_code(vec![
            Instruction::new(0, Opcode::Const(ConstValue::Int(0))),
            Instruction::new(1, Opcode::Store { slot: 0 }),
            Instruction::new(2, Opcode::Load { slot: 0 }),
            Instruction::new(3, Opcode::Const(ConstValue::Int(10))),
            Instruction::new(
                4,
                Opcode::IfCmp {
                    cond: Comparison::Ge,
                    target: 10,
                },
            ),
            Instruction::new(5, Opcode::Load { slot: 0 }),
            Instruction::new(6, Opcode::Const(ConstValue::Int(2))),
            Instruction::new(7, Opcode::Binary(BinaryOp::Add)),
            Instruction::new(8, Opcode::Store { slot: 0 }),
            Instruction::new(9, Opcode::Goto { target: 2 }),
            Instruction::new(10, Opcode::Return { with_value: false }),
        ]);
        let sink = WarningSink::new();
        let mut ctx = DecompileContext::new(code.id.clone(), DecompileOptions::new(), &sink);
        let (mut tree, _vars) = process_method(&code, &mut ctx).expect("pipeline failed");

        // One more full round of the enhancement suite over the settled
        // pre-finalization tree must find nothing left to rewrite.
        let mut changed = labels::cleanup_edges(&mut tree);
        changed |= sequences::condense_sequences(&mut tree);
        changed |= merge::enhance_loops(&mut tree);
        changed |= loops::extract_loops(&mut tree);
        changed |= ifs::merge_all_ifs(&mut tree);
        changed |= labels::identify_labels(&mut tree);
        changed |= inline_block::inline_single_blocks(&mut tree);
        changed |= exits::condense_exits(&mut tree);
        assert!(!changed, "suite rewrote an already settled tree");
    }
}
