//! # methodscope Prelude
//!
//! Curated re-exports of the types needed for the common workflow: build a
//! [`MethodCode`], pick [`DecompileOptions`], run [`decompile_method`] (or
//! fan out with [`decompile_all`] / [`MethodWorker`]) and walk the resulting
//! statement tree.

/// The error type for all methodscope operations
pub use crate::Error;

/// The result type used throughout methodscope
pub use crate::Result;

/// Method input boundary types
pub use crate::bytecode::{
    BinaryOp, Comparison, ConstValue, ExceptionEntry, Instruction, InvokeKind, MethodCode,
    MethodFlags, MethodId, Opcode, UnaryOp,
};

/// Control flow graph surface
pub use crate::cfg::{BasicBlock, BlockId, ControlFlowGraph};

/// Statement tree surface
pub use crate::stmt::{
    IfKind, LoopKind, StatEdge, StatEdgeKind, Statement, StatementId, StatementKind, StatementTree,
};

/// Expression model
pub use crate::expr::{ExitKind, Expr, FieldRef, FunctionKind, VarOrigin, VarRef};

/// Variable table
pub use crate::vars::{VarProcessor, VarType};

/// Pipeline entry points, options and diagnostics
pub use crate::pipeline::{
    decompile_all, decompile_method, DecompileOptions, Decompiled, MethodWorker, Warning,
    WarningKind, WarningSink,
};
