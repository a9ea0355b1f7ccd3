//! Control flow graph construction and normalization.
//!
//! The CFG is an arena of [`BasicBlock`]s addressed by stable [`BlockId`]
//! indices. Edges and protected ranges reference blocks by index only, so
//! the graph can be mutated freely (dead-code removal, jsr inlining, block
//! merging, finally duplication) without invalidating references held by
//! later pipeline stages.
//!
//! Construction and normalization are split into:
//!
//! - [`builder`] - instruction sequence + exception table into a block partition
//! - [`normalize`] - dead-block removal, jsr inlining, synthetic exit,
//!   goto removal, block merging
//! - [`DominatorTree`] - dominance relation used by the statement tree parser

mod block;
pub mod builder;
mod dominators;
mod edge;
mod graph;
pub mod normalize;

pub use block::{BasicBlock, BlockId};
pub use dominators::DominatorTree;
pub use edge::{CfgEdge, CfgEdgeKind, RangeId};
pub use graph::{ControlFlowGraph, ProtectedRange};
