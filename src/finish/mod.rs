//! Tree finalization.
//!
//! Runs after the enhancement fixpoint has stabilized: secondary
//! syntactic patterns are recovered from the settled expression trees,
//! declaration points are assigned, and the continue/break rewrite closes
//! the pipeline. That rewrite leaves edge bookkeeping inconsistent, so
//! nothing may run after it.

pub mod declarations;
pub mod edges;
pub mod secondary;

pub use declarations::place_declarations;
pub use edges::replace_continue_with_break;
pub use secondary::{identify_compound_assignments, identify_ternaries};
