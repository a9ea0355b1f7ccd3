// Copyright 2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![deny(unsafe_code)]

//! # methodscope
//!
//! [![Crates.io](https://img.shields.io/crates/v/methodscope.svg)](https://crates.io/crates/methodscope)
//! [![Documentation](https://docs.rs/methodscope/badge.svg)](https://docs.rs/methodscope)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/methodscope/blob/main/LICENSE)
//!
//! A per-method JVM bytecode decompiler core. `methodscope` takes one method's
//! decoded instruction sequence plus its exception table and produces a nested,
//! source-shaped statement tree with versioned variables, ready for a rendering
//! layer to print as Java-like source.
//!
//! ## Features
//!
//! - **Control-flow recovery** - basic block partition, jsr inlining, dominance
//!   based statement nesting (sequences, ifs, loops, switches, try/catch)
//! - **Exception deobfuscation** - circular range removal, pop-range recovery,
//!   best-effort handling of damaged exception tables
//! - **Finally replication** - `finally` bodies are duplicated onto each exit
//!   path and synchronized-block handlers collapse back into `synchronized`
//! - **Expression lifting** - stack-machine instructions become expression
//!   trees; stack temporaries fold away, `++`/`--` and ternary shapes return
//! - **Isolated parallel execution** - one worker per method, failures and
//!   options never leak between concurrently decompiled methods
//!
//! ## Quick Start
//!
//! ```rust
//! use methodscope::prelude::*;
//!
//! let code = MethodCode::new(
//!     MethodId::new("com/example/Foo", "answer", "()I"),
//!     MethodFlags::PUBLIC,
//!     vec![
//!         Instruction::new(0, Opcode::Const(ConstValue::Int(42))),
//!         Instruction::new(1, Opcode::Return { with_value: true }),
//!     ],
//! );
//!
//! let sink = WarningSink::new();
//! let decompiled = decompile_method(code, DecompileOptions::new(), &sink)?;
//! assert!(sink.is_empty());
//! println!("{} statements", decompiled.tree.arena_len());
//! # Ok::<(), methodscope::Error>(())
//! ```
//!
//! ### Decompiling many methods
//!
//! Each method runs as an isolated unit. [`pipeline::MethodWorker`] hands one
//! method to a background thread with a timed wait; [`pipeline::decompile_all`]
//! fans a whole method list out over a thread pool:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use methodscope::prelude::*;
//!
//! # let methods: Vec<MethodCode> = vec![];
//! let sink = Arc::new(WarningSink::new());
//! for (method, result) in decompile_all(methods, DecompileOptions::new(), &sink) {
//!     match result {
//!         Ok(decompiled) => println!("{method}: {} vars", decompiled.vars.declared_count()),
//!         Err(err) => eprintln!("{method}: {err}"),
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! The pipeline is a fixed pass order over two arenas: a [`cfg`] of basic
//! blocks and a [`stmt`] tree of statements, both addressed by stable index
//! IDs so passes can rewrite freely without invalidating references. Fatal
//! errors abort the affected method only; diagnostics accumulate in a shared
//! append-only [`pipeline::WarningSink`].

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use methodscope::prelude::*;
///
/// # let code: MethodCode = unimplemented!();
/// let sink = WarningSink::new();
/// let decompiled = decompile_method(code, DecompileOptions::new(), &sink)?;
/// # Ok::<(), methodscope::Error>(())
/// ```
pub mod prelude;

/// Input boundary: decoded instructions, exception tables and the method
/// envelope handed over by the class-structure collaborator.
pub mod bytecode;

/// Control flow graph arena, construction and normalization.
pub mod cfg;

/// Exception table deobfuscation.
pub mod deob;

/// Structural enhancement passes (loop shapes, if merging, labels, exits).
pub mod enhance;

/// Expression trees and stack-machine lifting.
pub mod expr;

/// Tree finalization: secondary functions, declarations, the closing edge
/// rewrite.
pub mod finish;

/// Pass orchestration, options, warning sink and the isolated worker.
pub mod pipeline;

/// Statement tree arena, dominance parsing and finally replication.
pub mod stmt;

/// Variable versioning and simplification.
pub mod vars;

pub use error::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
