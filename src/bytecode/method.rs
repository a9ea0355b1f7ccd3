//! Method envelope: identity, access flags, code and exception table.

use std::fmt;

use bitflags::bitflags;

use crate::bytecode::Instruction;

bitflags! {
    /// JVM method access flags, as found in the `access_flags` field of a
    /// `method_info` structure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u16 {
        /// `ACC_PUBLIC`.
        const PUBLIC = 0x0001;
        /// `ACC_PRIVATE`.
        const PRIVATE = 0x0002;
        /// `ACC_PROTECTED`.
        const PROTECTED = 0x0004;
        /// `ACC_STATIC`.
        const STATIC = 0x0008;
        /// `ACC_FINAL`.
        const FINAL = 0x0010;
        /// `ACC_SYNCHRONIZED`.
        const SYNCHRONIZED = 0x0020;
        /// `ACC_BRIDGE`.
        const BRIDGE = 0x0040;
        /// `ACC_VARARGS`.
        const VARARGS = 0x0080;
        /// `ACC_NATIVE`.
        const NATIVE = 0x0100;
        /// `ACC_ABSTRACT`.
        const ABSTRACT = 0x0400;
        /// `ACC_SYNTHETIC`.
        const SYNTHETIC = 0x1000;
    }
}

/// Identity of a method: owning class, name and descriptor.
///
/// Carried through the whole pipeline and attached to every warning and
/// failure so callers can attribute results when decompiling many methods
/// concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodId {
    /// Internal name of the owning class (e.g. `com/example/Foo`).
    pub class: String,
    /// Method name (`<init>` and `<clinit>` for constructors/initializers).
    pub name: String,
    /// JVM method descriptor (e.g. `(ILjava/lang/String;)V`).
    pub descriptor: String,
}

impl MethodId {
    /// Creates a new method identity.
    #[must_use]
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}

/// One entry of a method's exception table: a protected bytecode range and
/// its handler.
///
/// Offsets follow the class-file convention: `[start, end)` with `end`
/// exclusive. `None` for `exception_type` means catch-all (the encoding used
/// by `finally` handlers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// Start of the protected range (inclusive bytecode offset).
    pub start: u32,
    /// End of the protected range (exclusive bytecode offset).
    pub end: u32,
    /// Handler entry point (bytecode offset).
    pub handler: u32,
    /// Caught exception class, or `None` for catch-all.
    pub exception_type: Option<String>,
}

/// Everything the class-structure collaborator hands over for one method:
/// the decoded instruction sequence, the exception table, the
/// local-variable-slot count and the owning method identity.
///
/// This is the sole input to [`crate::pipeline::decompile_method`].
#[derive(Debug, Clone)]
pub struct MethodCode {
    /// Identity of the method.
    pub id: MethodId,
    /// Access flags.
    pub flags: MethodFlags,
    /// Decoded instruction sequence, in offset order.
    pub instructions: Vec<Instruction>,
    /// Raw exception table.
    pub exceptions: Vec<ExceptionEntry>,
    /// Number of local-variable slots (`max_locals`).
    pub local_slots: u16,
}

impl MethodCode {
    /// Creates a method-code envelope with no exception table.
    #[must_use]
    pub fn new(id: MethodId, flags: MethodFlags, instructions: Vec<Instruction>) -> Self {
        Self {
            id,
            flags,
            instructions,
            exceptions: Vec::new(),
            local_slots: 0,
        }
    }

    /// Returns `true` if this method is a static initializer (`<clinit>`).
    ///
    /// Static initializers have at most one return point, so the exit
    /// condensation transform must not run on them.
    #[must_use]
    pub fn is_static_initializer(&self) -> bool {
        self.name() == "<clinit>"
    }

    /// Returns the method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Releases the raw instruction data.
    ///
    /// Called by the finalizer once the statement tree has been handed off;
    /// the tree no longer references the original sequence.
    pub fn release_resources(&mut self) {
        self.instructions = Vec::new();
        self.exceptions = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_initializer_detection() {
        let clinit = MethodCode::new(
            MethodId::new("com/example/Foo", "<clinit>", "()V"),
            MethodFlags::STATIC,
            vec![],
        );
        assert!(clinit.is_static_initializer());

        let regular = MethodCode::new(
            MethodId::new("com/example/Foo", "bar", "()V"),
            MethodFlags::PUBLIC,
            vec![],
        );
        assert!(!regular.is_static_initializer());
    }

    #[test]
    fn method_id_display() {
        let id = MethodId::new("com/example/Foo", "bar", "(I)V");
        assert_eq!(id.to_string(), "com/example/Foo.bar(I)V");
    }
}
