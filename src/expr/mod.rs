//! Expression trees and stack-machine lifting.
//!
//! [`lift`] interprets each `Basic` leaf's instructions against a local
//! abstract operand stack and attaches the resulting [`Expr`] list to the
//! leaf. Values left on the stack at a block boundary are materialized into
//! synthetic stack variables, which the variable simplifier later folds into
//! source-like variables.

mod expression;
pub mod lift;

pub use expression::{ExitKind, Expr, FieldRef, FunctionKind, VarOrigin, VarRef};
