use thiserror::Error;

use crate::bytecode::MethodId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::MalformedBytecode {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedBytecode {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure mode of the per-method decompilation pipeline is represented here. Errors
/// propagate unchanged through the pipeline stages up to the [`crate::pipeline::MethodWorker`],
/// which is the only place they are converted into a caller-visible result.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::MalformedBytecode`] - Branch target or exception range outside the method body
///
/// ## Pipeline Errors
/// - [`Error::InconsistentStack`] - Expression lifting hit an impossible operand stack state
/// - [`Error::FinallyLoopNotConverging`] - The finally replication fixpoint tripped its ceiling
/// - [`Error::VarSimplifyNotConverging`] - The variable simplification fixpoint tripped its ceiling
/// - [`Error::GraphError`] - An internal CFG or statement tree invariant was violated
///
/// ## Execution Errors
/// - [`Error::WorkerPanicked`] - A worker thread hit an unexpected fault; never silently swallowed
#[derive(Error, Debug)]
pub enum Error {
    /// The method bytecode is damaged and could not be turned into a CFG.
    ///
    /// Raised when a branch target falls outside the instruction range or an
    /// exception table entry references offsets that are not instruction
    /// boundaries. The error includes the source location where the
    /// malformation was detected for debugging purposes.
    #[error("Malformed bytecode - {file}:{line}: {message}")]
    MalformedBytecode {
        /// The message to be printed for the malformed bytecode error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Expression lifting encountered an impossible operand stack state.
    ///
    /// Stack underflow or a value-kind mismatch while interpreting a basic
    /// block's stack-machine instructions. Fatal for the affected method.
    #[error("Inconsistent operand stack in block {block}: {message}")]
    InconsistentStack {
        /// Index of the basic block whose lifting failed
        block: usize,
        /// Description of the stack inconsistency
        message: String,
    },

    /// The finally replication loop did not converge.
    ///
    /// Each iteration duplicates a `finally` body and re-parses the statement
    /// tree. Pathological inputs could in principle loop forever; a fixed
    /// iteration ceiling guards against that and trips this error instead.
    #[error("Finally replication did not converge after {iterations} iterations")]
    FinallyLoopNotConverging {
        /// Number of iterations performed before giving up
        iterations: usize,
    },

    /// The stack-variable simplification loop did not converge.
    ///
    /// The simplify / re-version / fold-increments cycle must strictly reduce
    /// or preserve the temporary-variable count. If it keeps reporting changes
    /// past a bounded number of iterations, this error is raised rather than
    /// looping forever.
    #[error("Variable simplification did not converge after {iterations} iterations")]
    VarSimplifyNotConverging {
        /// Number of iterations performed before giving up
        iterations: usize,
    },

    /// An internal graph or statement tree invariant was violated.
    ///
    /// Indicates a pipeline bug rather than bad input: a pass observed a CFG
    /// or statement arena state that the preceding passes should have made
    /// impossible.
    #[error("{0}")]
    GraphError(String),

    /// A worker thread hit an unexpected fault.
    ///
    /// The panic payload is captured and reported to the caller through the
    /// worker's result channel; it is never silently swallowed, and it never
    /// affects any other concurrently running method unit.
    #[error("Decompilation of {method} panicked: {message}")]
    WorkerPanicked {
        /// Identity of the method whose worker panicked
        method: MethodId,
        /// Stringified panic payload
        message: String,
    },
}
