//! Variable bookkeeping: versioning, stack-temporary folding, increment
//! idioms.
//!
//! Lifting leaves the tree full of synthetic stack variables. The
//! simplifier folds single-use temporaries back into their consumers,
//! [`versions`] numbers every surviving definition and infers a coarse
//! type per version, and [`ppmm`] rewrites `x = x + 1` shapes into
//! increment expressions. The pipeline cycles these until the increment
//! scan stops finding new patterns.

pub mod ppmm;
mod processor;
pub mod simplify;
pub mod versions;

pub use processor::{VarProcessor, VarType};
