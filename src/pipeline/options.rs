//! Decompilation options.

/// Recognized decompilation options, snapshotted per method run.
///
/// The snapshot is immutable for the lifetime of a run; two concurrent
/// runs with different options never observe each other's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompileOptions {
    /// Drop protected ranges that cover no live instruction.
    pub remove_empty_ranges: bool,
    /// Merge a lone `return` outside any protected range into the
    /// surrounding exit handling.
    pub no_exceptions_return: bool,
    /// Strip instrumented `if (x == null) throw ...` parameter guards.
    pub not_null_annotations: bool,
}

impl DecompileOptions {
    /// Options with every cleanup enabled except not-null stripping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            remove_empty_ranges: true,
            no_exceptions_return: true,
            not_null_annotations: false,
        }
    }

    /// Enables or disables empty protected-range removal.
    #[must_use]
    pub const fn with_remove_empty_ranges(mut self, enabled: bool) -> Self {
        self.remove_empty_ranges = enabled;
        self
    }

    /// Enables or disables lone-return merging.
    #[must_use]
    pub const fn with_no_exceptions_return(mut self, enabled: bool) -> Self {
        self.no_exceptions_return = enabled;
        self
    }

    /// Enables or disables not-null guard stripping.
    #[must_use]
    pub const fn with_not_null_annotations(mut self, enabled: bool) -> Self {
        self.not_null_annotations = enabled;
        self
    }
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self::new()
    }
}
