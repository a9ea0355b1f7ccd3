//! JVM instruction model.
//!
//! Opcodes are grouped by shape rather than enumerated per JVM mnemonic: the
//! pipeline never needs to distinguish `iload_0` from `iload 0`, only the
//! operand shapes and control flow effects. The class-file collaborator is
//! expected to collapse the specialised encodings into these groups.

/// A constant pushed by a `ldc` / `iconst` / `aconst_null` family instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// `aconst_null`.
    Null,
    /// Integer constants (`iconst_*`, `bipush`, `sipush`, `ldc` int).
    Int(i64),
    /// Floating point constants.
    Float(f64),
    /// String constants from the constant pool.
    Str(String),
    /// Class literal constants (`ldc` with a class reference).
    Class(String),
}

/// Binary operators produced by the arithmetic/logic opcode families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BinaryOp {
    /// `iadd` family.
    #[strum(serialize = "+")]
    Add,
    /// `isub` family.
    #[strum(serialize = "-")]
    Sub,
    /// `imul` family.
    #[strum(serialize = "*")]
    Mul,
    /// `idiv` family.
    #[strum(serialize = "/")]
    Div,
    /// `irem` family.
    #[strum(serialize = "%")]
    Rem,
    /// `ishl` family.
    #[strum(serialize = "<<")]
    Shl,
    /// `ishr` family.
    #[strum(serialize = ">>")]
    Shr,
    /// `iushr` family.
    #[strum(serialize = ">>>")]
    Ushr,
    /// `iand` family.
    #[strum(serialize = "&")]
    And,
    /// `ior` family.
    #[strum(serialize = "|")]
    Or,
    /// `ixor` family.
    #[strum(serialize = "^")]
    Xor,
    /// `lcmp` / `fcmpl` / `dcmpg` comparison producing -1/0/1.
    #[strum(serialize = "cmp")]
    Cmp,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UnaryOp {
    /// `ineg` family.
    #[strum(serialize = "-")]
    Neg,
    /// Primitive widening/narrowing conversions (`i2l`, `d2i`, ...).
    #[strum(serialize = "cast")]
    Convert,
}

/// Comparison condition of an `if*` branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `ifeq` / `if_icmpeq` / `if_acmpeq` / `ifnull`.
    Eq,
    /// `ifne` / `if_icmpne` / `if_acmpne` / `ifnonnull`.
    Ne,
    /// `iflt` / `if_icmplt`.
    Lt,
    /// `ifge` / `if_icmpge`.
    Ge,
    /// `ifgt` / `if_icmpgt`.
    Gt,
    /// `ifle` / `if_icmple`.
    Le,
}

impl Comparison {
    /// Returns the negated condition, used when a branch condition is hoisted
    /// into a loop header or merged into an `else if` chain.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
        }
    }
}

/// Dispatch kind of an `invoke*` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum InvokeKind {
    /// `invokevirtual`.
    Virtual,
    /// `invokestatic`.
    Static,
    /// `invokespecial` (constructors, private and super calls).
    Special,
    /// `invokeinterface`.
    Interface,
    /// `invokedynamic`.
    Dynamic,
}

/// A JVM opcode with its decoded operands.
///
/// Branch operands are bytecode offsets into the owning method, exactly as
/// they appeared in the `Code` attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    /// `nop`.
    Nop,
    /// Push a constant.
    Const(ConstValue),
    /// Load a local-variable slot onto the stack (`iload`/`aload` families).
    Load {
        /// Local variable slot index.
        slot: u16,
    },
    /// Pop the stack into a local-variable slot (`istore`/`astore` families).
    Store {
        /// Local variable slot index.
        slot: u16,
    },
    /// `iaload` family: pop index and array, push element.
    ArrayLoad,
    /// `iastore` family: pop value, index and array.
    ArrayStore,
    /// `arraylength`.
    ArrayLength,
    /// `pop`.
    Pop,
    /// `dup`.
    Dup,
    /// `dup_x1`.
    DupX1,
    /// `swap`.
    Swap,
    /// Arithmetic/logic binary operation (pops two, pushes one).
    Binary(BinaryOp),
    /// Unary operation (pops one, pushes one).
    Unary(UnaryOp),
    /// `iinc`: increment a slot in place without touching the stack.
    Iinc {
        /// Local variable slot index.
        slot: u16,
        /// Signed increment.
        delta: i16,
    },
    /// Single-operand conditional branch (`ifeq` family, compares against
    /// zero/null); falls through when the condition is false.
    If {
        /// Branch condition.
        cond: Comparison,
        /// Branch target bytecode offset.
        target: u32,
    },
    /// Two-operand conditional branch (`if_icmp*` / `if_acmp*` families).
    IfCmp {
        /// Branch condition.
        cond: Comparison,
        /// Branch target bytecode offset.
        target: u32,
    },
    /// `goto` / `goto_w`.
    Goto {
        /// Branch target bytecode offset.
        target: u32,
    },
    /// `jsr` / `jsr_w`: subroutine call, pushes the return address.
    Jsr {
        /// Subroutine entry bytecode offset.
        target: u32,
    },
    /// `ret`: subroutine return through a local slot.
    Ret {
        /// Slot holding the return address.
        slot: u16,
    },
    /// `tableswitch` / `lookupswitch`, normalised to key/target pairs.
    Switch {
        /// Case keys, parallel to `targets`.
        keys: Vec<i32>,
        /// Case target bytecode offsets, parallel to `keys`.
        targets: Vec<u32>,
        /// Default target bytecode offset.
        default: u32,
    },
    /// `return` / `ireturn` family.
    Return {
        /// `true` for the value-carrying variants.
        with_value: bool,
    },
    /// `getfield`.
    GetField {
        /// Declaring class internal name.
        class: String,
        /// Field name.
        name: String,
    },
    /// `putfield`.
    PutField {
        /// Declaring class internal name.
        class: String,
        /// Field name.
        name: String,
    },
    /// `getstatic`.
    GetStatic {
        /// Declaring class internal name.
        class: String,
        /// Field name.
        name: String,
    },
    /// `putstatic`.
    PutStatic {
        /// Declaring class internal name.
        class: String,
        /// Field name.
        name: String,
    },
    /// `invoke*` call.
    Invoke {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Declaring class internal name.
        class: String,
        /// Method name.
        name: String,
        /// Number of declared parameters (excluding any receiver).
        argc: usize,
        /// `true` when the descriptor's return type is not `void`.
        returns: bool,
    },
    /// `new`.
    New {
        /// Instantiated class internal name.
        class: String,
    },
    /// `newarray` / `anewarray`.
    NewArray {
        /// Element type internal name or primitive name.
        element: String,
    },
    /// `checkcast`.
    CheckCast {
        /// Target class internal name.
        class: String,
    },
    /// `instanceof`.
    InstanceOf {
        /// Tested class internal name.
        class: String,
    },
    /// `athrow`.
    Athrow,
    /// `monitorenter`.
    MonitorEnter,
    /// `monitorexit`.
    MonitorExit,
}

/// A single decoded instruction: opcode plus its position in the original
/// sequence. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Bytecode offset of this instruction within the method body.
    pub offset: u32,
    /// The decoded opcode with operands.
    pub opcode: Opcode,
}

impl Instruction {
    /// Creates a new instruction at the given bytecode offset.
    #[must_use]
    pub const fn new(offset: u32, opcode: Opcode) -> Self {
        Self { offset, opcode }
    }

    /// Returns all explicit branch targets of this instruction (bytecode offsets).
    ///
    /// Fall-through successors are not included; the CFG builder derives those
    /// from instruction order.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.opcode {
            Opcode::If { target, .. }
            | Opcode::IfCmp { target, .. }
            | Opcode::Goto { target }
            | Opcode::Jsr { target } => vec![*target],
            Opcode::Switch {
                targets, default, ..
            } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }

    /// Returns `true` if control can fall through to the next instruction.
    #[must_use]
    pub fn falls_through(&self) -> bool {
        !matches!(
            self.opcode,
            Opcode::Goto { .. }
                | Opcode::Ret { .. }
                | Opcode::Switch { .. }
                | Opcode::Return { .. }
                | Opcode::Athrow
        )
    }

    /// Returns `true` if this instruction ends a basic block.
    #[must_use]
    pub fn is_block_terminator(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::If { .. }
                | Opcode::IfCmp { .. }
                | Opcode::Goto { .. }
                | Opcode::Jsr { .. }
                | Opcode::Ret { .. }
                | Opcode::Switch { .. }
                | Opcode::Return { .. }
                | Opcode::Athrow
        )
    }

    /// Returns `true` for the unconditional exit opcodes (`return` family and
    /// `athrow`); these receive an edge to the synthetic exit block during
    /// graph normalization.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self.opcode, Opcode::Return { .. } | Opcode::Athrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_targets_of_conditional() {
        let instr = Instruction::new(
            0,
            Opcode::IfCmp {
                cond: Comparison::Lt,
                target: 12,
            },
        );
        assert_eq!(instr.branch_targets(), vec![12]);
        assert!(instr.falls_through());
        assert!(instr.is_block_terminator());
    }

    #[test]
    fn switch_targets_include_default() {
        let instr = Instruction::new(
            0,
            Opcode::Switch {
                keys: vec![0, 1],
                targets: vec![8, 16],
                default: 24,
            },
        );
        assert_eq!(instr.branch_targets(), vec![8, 16, 24]);
        assert!(!instr.falls_through());
    }

    #[test]
    fn return_is_exit() {
        let instr = Instruction::new(4, Opcode::Return { with_value: false });
        assert!(instr.is_exit());
        assert!(!instr.falls_through());
        assert!(instr.branch_targets().is_empty());
    }

    #[test]
    fn comparison_negation_round_trips() {
        for cond in [
            Comparison::Eq,
            Comparison::Ne,
            Comparison::Lt,
            Comparison::Ge,
            Comparison::Gt,
            Comparison::Le,
        ] {
            assert_eq!(cond.negate().negate(), cond);
        }
    }
}
