//! Per-run context and the shared warning sink.
//!
//! A [`DecompileContext`] is owned by exactly one method run; the only
//! shared piece is the [`WarningSink`], which is append-only and safe for
//! concurrent writers.

use dashmap::DashSet;

use crate::{bytecode::MethodId, pipeline::DecompileOptions};

/// Non-fatal diagnostic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum WarningKind {
    /// Exception ranges remained irreducible after deobfuscation; the
    /// pipeline continued with best-effort ranges.
    ObfuscatedExceptionLayout,
}

/// One non-fatal diagnostic, attributed to the method that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    /// The method being decompiled when the warning was raised.
    pub method: MethodId,
    /// Diagnostic category.
    pub kind: WarningKind,
    /// Human-readable detail.
    pub message: String,
}

/// Append-only warning log shared by concurrent method runs.
///
/// Writers never block each other; each `(method, kind)` pair is recorded
/// once, so a fixpoint that re-detects the same condition does not flood
/// the log.
#[derive(Debug, Default)]
pub struct WarningSink {
    events: boxcar::Vec<Warning>,
    seen: DashSet<(MethodId, WarningKind)>,
}

impl WarningSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a warning, deduplicated per method and kind.
    pub fn warn(&self, method: MethodId, kind: WarningKind, message: impl Into<String>) {
        if self.seen.insert((method.clone(), kind)) {
            self.events.push(Warning {
                method,
                kind,
                message: message.into(),
            });
        }
    }

    /// Number of recorded warnings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns `true` when no warning was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over recorded warnings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Warning> + '_ {
        self.events.iter().map(|(_, w)| w)
    }
}

/// Per-run pass statistics, reported alongside fixpoint errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Finally replication rounds performed.
    pub finally_rounds: usize,
    /// Variable simplification rounds performed.
    pub simplify_rounds: usize,
    /// Structural enhancement rounds performed.
    pub enhance_rounds: usize,
}

/// Everything one method run carries between passes: the options
/// snapshot, its counters and a handle to the shared sink.
///
/// Never shared between runs; isolation between concurrent methods is a
/// consequence of exclusive ownership, not locking.
#[derive(Debug)]
pub struct DecompileContext<'s> {
    /// The method being decompiled.
    pub method: MethodId,
    /// Immutable options snapshot.
    pub options: DecompileOptions,
    /// Fixpoint round counters.
    pub counters: Counters,
    sink: &'s WarningSink,
}

impl<'s> DecompileContext<'s> {
    /// Creates the context for one method run.
    #[must_use]
    pub fn new(method: MethodId, options: DecompileOptions, sink: &'s WarningSink) -> Self {
        Self {
            method,
            options,
            counters: Counters::default(),
            sink,
        }
    }

    /// Records a warning attributed to this run's method.
    pub fn warn(&self, kind: WarningKind, message: impl Into<String>) {
        self.sink.warn(self.method.clone(), kind, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_method(name: &str) -> MethodId {
        MethodId::new("com/example/Foo", name, "()V")
    }

    #[test]
    fn warnings_are_deduplicated_per_method_and_kind() {
        let sink = WarningSink::new();
        sink.warn(
            make_method("a"),
            WarningKind::ObfuscatedExceptionLayout,
            "first",
        );
        sink.warn(
            make_method("a"),
            WarningKind::ObfuscatedExceptionLayout,
            "second",
        );
        sink.warn(
            make_method("b"),
            WarningKind::ObfuscatedExceptionLayout,
            "other method",
        );

        assert_eq!(sink.len(), 2);
        let messages: Vec<_> = sink.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "other method"]);
    }

    #[test]
    fn context_attributes_warnings_to_its_method() {
        let sink = WarningSink::new();
        let ctx = DecompileContext::new(make_method("a"), DecompileOptions::new(), &sink);
        ctx.warn(WarningKind::ObfuscatedExceptionLayout, "layout");

        let warning = sink.iter().next().map(Warning::clone);
        assert_eq!(warning.map(|w| w.method.name), Some("a".to_string()));
    }
}
