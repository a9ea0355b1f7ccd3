//! Repairs for malformed or obfuscated exception layouts.
//!
//! Obfuscators (and damaged class files) produce exception tables the
//! statement parser cannot structure: ranges protecting their own
//! handlers, handlers reachable through regular edges, dangling
//! pop-and-continue handler code. [`exceptions`] repairs what it can and
//! flags the rest for a non-fatal warning.

pub mod exceptions;
