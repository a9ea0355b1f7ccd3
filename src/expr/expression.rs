//! The expression node model.
//!
//! Expressions are plain owned trees; sharing between statements is never
//! required, so no arena is used at this level. Pattern matching passes
//! (stack-var simplification, ++/-- folding, secondary functions) rewrite
//! them in place.

use crate::bytecode::{BinaryOp, Comparison, ConstValue, InvokeKind, UnaryOp};

/// Where a variable came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum VarOrigin {
    /// A local-variable slot from the original bytecode.
    Local,
    /// A synthetic operand-stack temporary introduced by lifting.
    Stack,
}

/// A versioned variable reference.
///
/// `id` is the slot index for locals and a counter-allocated id for stack
/// temporaries; `version` is 0 until the variable versioner has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarRef {
    /// Variable id (slot for locals, allocated id for stack temporaries).
    pub id: u32,
    /// Version number, one per definition; 0 before versioning.
    pub version: u32,
    /// Origin of the variable.
    pub origin: VarOrigin,
}

impl VarRef {
    /// Creates an unversioned local-slot reference.
    #[must_use]
    pub const fn local(slot: u16) -> Self {
        Self {
            id: slot as u32,
            version: 0,
            origin: VarOrigin::Local,
        }
    }

    /// Creates an unversioned stack temporary.
    #[must_use]
    pub const fn stack(id: u32) -> Self {
        Self {
            id,
            version: 0,
            origin: VarOrigin::Stack,
        }
    }

    /// Returns `true` if the two refer to the same variable ignoring versions.
    #[must_use]
    pub fn same_var(&self, other: &VarRef) -> bool {
        self.id == other.id && self.origin == other.origin
    }
}

/// A field reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    /// Declaring class internal name.
    pub class: String,
    /// Field name.
    pub name: String,
    /// `true` for static fields.
    pub is_static: bool,
}

/// Secondary syntactic functions and operators.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionKind {
    /// Binary arithmetic/logic operator.
    Binary(BinaryOp),
    /// Unary operator.
    Unary(UnaryOp),
    /// Comparison producing a boolean, from a branch condition.
    Compare(Comparison),
    /// Boolean negation, introduced when conditions are hoisted or merged.
    Not,
    /// Short-circuit and, from if-merging.
    BoolAnd,
    /// Short-circuit or, from if-merging.
    BoolOr,
    /// `cond ? a : b`, identified by the finalizer.
    Ternary,
    /// Pre/post increment/decrement folded from `x = x + 1` shapes.
    /// `delta` is +1 or -1.
    IncDec {
        /// +1 for increment, -1 for decrement.
        delta: i32,
    },
    /// `instanceof` test.
    InstanceOf(String),
    /// Checked cast.
    Cast(String),
    /// `arraylength`.
    ArrayLength,
}

/// Exit flavor of an [`Expr::Exit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ExitKind {
    /// `return` (with or without a value).
    Return,
    /// `throw`.
    Throw,
}

/// An expression-tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant.
    Const(ConstValue),
    /// Variable read.
    Var(VarRef),
    /// Field read; `receiver` is `None` for statics.
    Field {
        /// The referenced field.
        field: FieldRef,
        /// Receiver object, `None` for statics.
        receiver: Option<Box<Expr>>,
    },
    /// Array element read.
    ArrayAccess {
        /// The array value.
        array: Box<Expr>,
        /// The element index.
        index: Box<Expr>,
    },
    /// Method call.
    Invocation {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Declaring class internal name.
        class: String,
        /// Method name.
        name: String,
        /// Receiver, `None` for static calls.
        receiver: Option<Box<Expr>>,
        /// Argument expressions in declaration order.
        args: Vec<Expr>,
    },
    /// Object allocation, with constructor arguments once folded.
    New {
        /// Instantiated class internal name.
        class: String,
        /// Constructor arguments; empty until the `<init>` call is folded in.
        args: Vec<Expr>,
    },
    /// Array allocation.
    NewArray {
        /// Element type name.
        element: String,
        /// Array length.
        length: Box<Expr>,
    },
    /// Operator application.
    Function {
        /// The operator.
        kind: FunctionKind,
        /// Operands.
        operands: Vec<Expr>,
    },
    /// Assignment; `op` carries the compound operator once identified.
    Assignment {
        /// Assignment target (variable, field or array element).
        target: Box<Expr>,
        /// Assigned value.
        value: Box<Expr>,
        /// Compound operator (`+=` etc.), `None` for plain `=`.
        op: Option<BinaryOp>,
    },
    /// Block-terminating branch condition; consumed by the if/loop
    /// statements that own the block.
    Branch {
        /// The branch condition.
        condition: Box<Expr>,
    },
    /// Switch selector at the end of a dispatching block.
    SwitchHead {
        /// The dispatched value.
        selector: Box<Expr>,
    },
    /// Method exit.
    Exit {
        /// Return or throw.
        kind: ExitKind,
        /// Returned/thrown value, if any.
        value: Option<Box<Expr>>,
    },
    /// `monitorenter` / `monitorexit`.
    Monitor {
        /// `true` for enter.
        enter: bool,
        /// The monitored object.
        object: Box<Expr>,
    },
}

impl Expr {
    /// Builds a variable-read expression.
    #[must_use]
    pub const fn var(var: VarRef) -> Self {
        Self::Var(var)
    }

    /// Builds a plain assignment to a variable.
    #[must_use]
    pub fn assign(target: VarRef, value: Expr) -> Self {
        Self::Assignment {
            target: Box::new(Self::Var(target)),
            value: Box::new(value),
            op: None,
        }
    }

    /// Returns the assigned variable when this is a plain assignment whose
    /// target is a variable.
    #[must_use]
    pub fn assigned_var(&self) -> Option<VarRef> {
        if let Self::Assignment { target, op: None, .. } = self {
            if let Self::Var(var) = target.as_ref() {
                return Some(*var);
            }
        }
        None
    }

    /// Visits every node of the tree, outermost first.
    pub fn visit(&self, visitor: &mut impl FnMut(&Expr)) {
        visitor(self);
        for child in self.children() {
            child.visit(visitor);
        }
    }

    /// Visits every node mutably, outermost first.
    pub fn visit_mut(&mut self, visitor: &mut impl FnMut(&mut Expr)) {
        visitor(self);
        for child in self.children_mut() {
            child.visit_mut(visitor);
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Const(_) | Self::Var(_) => Vec::new(),
            Self::Field { receiver, .. } => receiver.iter().map(Box::as_ref).collect(),
            Self::ArrayAccess { array, index } => vec![array, index],
            Self::Invocation { receiver, args, .. } => {
                let mut out: Vec<&Expr> = receiver.iter().map(Box::as_ref).collect();
                out.extend(args.iter());
                out
            }
            Self::New { args, .. } => args.iter().collect(),
            Self::NewArray { length, .. } => vec![length],
            Self::Function { operands, .. } => operands.iter().collect(),
            Self::Assignment { target, value, .. } => vec![target, value],
            Self::Branch { condition } => vec![condition],
            Self::SwitchHead { selector } => vec![selector],
            Self::Exit { value, .. } => value.iter().map(Box::as_ref).collect(),
            Self::Monitor { object, .. } => vec![object],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Self::Const(_) | Self::Var(_) => Vec::new(),
            Self::Field { receiver, .. } => receiver.iter_mut().map(Box::as_mut).collect(),
            Self::ArrayAccess { array, index } => vec![array, index],
            Self::Invocation { receiver, args, .. } => {
                let mut out: Vec<&mut Expr> = receiver.iter_mut().map(Box::as_mut).collect();
                out.extend(args.iter_mut());
                out
            }
            Self::New { args, .. } => args.iter_mut().collect(),
            Self::NewArray { length, .. } => vec![length],
            Self::Function { operands, .. } => operands.iter_mut().collect(),
            Self::Assignment { target, value, .. } => vec![target, value],
            Self::Branch { condition } => vec![condition],
            Self::SwitchHead { selector } => vec![selector],
            Self::Exit { value, .. } => value.iter_mut().map(Box::as_mut).collect(),
            Self::Monitor { object, .. } => vec![object],
        }
    }

    /// Counts reads of `var` (matching id and origin, ignoring version).
    ///
    /// A plain-variable assignment target is a definition, not a read, and
    /// is excluded; this mirrors [`replace_first_var_use`](Self::replace_first_var_use).
    #[must_use]
    pub fn count_var_uses(&self, var: &VarRef) -> usize {
        match self {
            Self::Var(v) => usize::from(v.same_var(var)),
            Self::Assignment { target, value, .. } => {
                let target_reads = match target.as_ref() {
                    Self::Var(v) if v.same_var(var) => 0,
                    other => other.count_var_uses(var),
                };
                target_reads + value.count_var_uses(var)
            }
            _ => self.children().iter().map(|c| c.count_var_uses(var)).sum(),
        }
    }

    /// Replaces the first read of `var` with `replacement`.
    ///
    /// Returns `true` if a replacement happened. Assignment targets are not
    /// reads and are left untouched.
    pub fn replace_first_var_use(&mut self, var: &VarRef, replacement: &Expr) -> bool {
        match self {
            Self::Var(v) if v.same_var(var) => {
                *self = replacement.clone();
                true
            }
            Self::Assignment { value, .. } => value.replace_first_var_use(var, replacement),
            _ => {
                for child in self.children_mut() {
                    if child.replace_first_var_use(var, replacement) {
                        return true;
                    }
                }
                false
            }
        }
    }
}
