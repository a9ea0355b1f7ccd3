//! Statement tree: the source-shaped output of the decompiler.
//!
//! Statements live in an arena owned by [`StatementTree`], addressed by
//! stable [`StatementId`] indices. The tree itself is strictly nested
//! (every statement has at most one parent); [`StatEdge`]s are the only
//! cross-tree links and may reference statements across branches.
//!
//! [`dom_parser`] builds the initial tree from the normalized CFG using the
//! dominance relation; [`finally`] iterates with it to replicate `finally`
//! bodies until no further duplication is required.

pub mod dom_parser;
pub mod finally;
mod statement;

pub use statement::{
    IfKind, LoopKind, StatEdge, StatEdgeKind, Statement, StatementId, StatementKind, StatementTree,
};
