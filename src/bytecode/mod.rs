//! Input boundary types for the decompilation pipeline.
//!
//! The structural class-file parser is an external collaborator; what it hands
//! over is modeled here: a method's raw [`Instruction`] sequence, its
//! [`ExceptionEntry`] table, and the surrounding [`MethodCode`] envelope
//! (access flags, local-variable-slot count, owning class).
//!
//! Instructions are immutable once read. All positions are bytecode offsets
//! as they appeared in the original `Code` attribute; the CFG builder maps
//! them to instruction indices and fails with
//! [`Error::MalformedBytecode`](crate::Error::MalformedBytecode) when a
//! branch target does not land on an instruction boundary.

mod instruction;
mod method;

pub use instruction::{BinaryOp, Comparison, ConstValue, Instruction, InvokeKind, Opcode, UnaryOp};
pub use method::{ExceptionEntry, MethodCode, MethodFlags, MethodId};
