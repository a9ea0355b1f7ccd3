//! Per-method variable table.

use std::collections::HashMap;

use crate::{expr::VarRef, stmt::StatementId};

/// Coarse value type of a variable version, inferred from its definition.
///
/// The class-file collaborator does not hand over descriptors for locals,
/// so the table tracks only what expression shapes reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum VarType {
    /// Integral value (includes the boolean/char/short families).
    Int,
    /// Floating point value.
    Float,
    /// Object or array reference.
    Reference,
    /// Nothing known about this version yet.
    #[default]
    Unknown,
}

/// Mapping from versioned variables to types and declaration points.
///
/// Created once per method run, seeded with the local-slot count so fresh
/// variable ids never collide with slots, and mutated only by the
/// versioner and the finalizer.
#[derive(Debug)]
pub struct VarProcessor {
    next_var: u32,
    types: HashMap<(u32, u32), VarType>,
    declarations: HashMap<(u32, u32), StatementId>,
}

impl VarProcessor {
    /// Creates a table for a method with the given local-slot count.
    #[must_use]
    pub fn new(local_slots: u16) -> Self {
        Self {
            next_var: u32::from(local_slots),
            types: HashMap::new(),
            declarations: HashMap::new(),
        }
    }

    /// First variable id past the method's local slots; synthetic stack
    /// variables start here.
    #[must_use]
    pub const fn stack_base(&self) -> u32 {
        self.next_var
    }

    /// Allocates a fresh variable id.
    pub fn fresh_var(&mut self) -> u32 {
        let id = self.next_var;
        self.next_var += 1;
        id
    }

    /// Records the inferred type of a version, keeping the first
    /// non-[`VarType::Unknown`] answer.
    pub fn record_type(&mut self, var: VarRef, ty: VarType) {
        let entry = self.types.entry((var.id, var.version)).or_default();
        if *entry == VarType::Unknown {
            *entry = ty;
        }
    }

    /// Type of a version, [`VarType::Unknown`] when never recorded.
    #[must_use]
    pub fn var_type(&self, var: VarRef) -> VarType {
        self.types
            .get(&(var.id, var.version))
            .copied()
            .unwrap_or_default()
    }

    /// Records where a version must be declared.
    pub fn set_declaration(&mut self, var: VarRef, stmt: StatementId) {
        self.declarations.insert((var.id, var.version), stmt);
    }

    /// Declaration point of a version, if one was assigned.
    #[must_use]
    pub fn declaration(&self, var: VarRef) -> Option<StatementId> {
        self.declarations.get(&(var.id, var.version)).copied()
    }

    /// Number of versions with a declaration point.
    #[must_use]
    pub fn declared_count(&self) -> usize {
        self.declarations.len()
    }
}
