//! The statement arena and its edge model.

use std::fmt;

use crate::{
    cfg::BlockId,
    expr::Expr,
};

/// Stable index of a statement within a [`StatementTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(usize);

impl StatementId {
    /// Creates a statement ID from a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Loop classification, refined by the structural enhancer.
///
/// The tree parser produces only [`LoopKind::Unconditional`]; loop-shape
/// enhancement rewrites condition placement and upgrades the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LoopKind {
    /// `while(true)`-shaped loop, no hoisted condition.
    Unconditional,
    /// Condition hoisted to the loop header.
    While,
    /// Condition at the loop tail.
    DoWhile,
    /// Header condition plus a trailing update statement.
    For,
}

/// Shape of an `if` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfKind {
    /// Condition with a then-branch only.
    If,
    /// Condition with then- and else-branches.
    IfElse,
}

/// Statement variants.
///
/// Children are held in the owning [`Statement`]'s child list; the variant
/// determines their roles:
///
/// - `If`: `[head, then]` or `[head, then, else]`
/// - `Loop`: body statements in order
/// - `Switch`: `[head, case...]`
/// - `TryCatch`: `[try, handler...]`
/// - `Synchronized`: `[body]`
/// - `Root`: `[content, dummy-exit]`
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// The per-method root; always wraps the content and the dummy exit.
    Root,
    /// Synthetic statement anchoring the method exit.
    Dummy,
    /// A single basic block, lifted to an expression list.
    Basic {
        /// The CFG block this leaf represents.
        block: BlockId,
    },
    /// Ordered sequence of statements.
    Sequence,
    /// Conditional.
    If {
        /// Shape of the conditional.
        kind: IfKind,
    },
    /// Loop.
    Loop {
        /// Current classification.
        kind: LoopKind,
    },
    /// `switch` dispatch; case values parallel the case children.
    Switch {
        /// Case keys per non-head child; `None` is the default case.
        cases: Vec<Option<i32>>,
    },
    /// Protected region with handlers.
    TryCatch {
        /// `true` once the finally processor has claimed the catch-all
        /// handler as a `finally` body.
        finally: bool,
    },
    /// `synchronized` block recovered from its compiler-inserted handler.
    Synchronized,
}

/// Classification of a statement-level edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StatEdgeKind {
    /// Ordinary fall-through to the next statement.
    Regular,
    /// Exit from the closure statement.
    Break,
    /// Jump back to the closure loop's header.
    Continue,
    /// Flow into an exception handler.
    Exception,
}

/// A cross-tree control link between statements.
///
/// Edges are directed; the source is the statement whose edge list holds
/// them. `closure` names the statement a break/continue escapes or re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatEdge {
    /// Destination statement.
    pub target: StatementId,
    /// Edge classification.
    pub kind: StatEdgeKind,
    /// Statement exited (break) or continued; `None` for regular edges.
    pub closure: Option<StatementId>,
}

impl StatEdge {
    /// Creates a regular edge.
    #[must_use]
    pub const fn regular(target: StatementId) -> Self {
        Self {
            target,
            kind: StatEdgeKind::Regular,
            closure: None,
        }
    }

    /// Creates a break edge escaping `closure`.
    #[must_use]
    pub const fn brk(target: StatementId, closure: StatementId) -> Self {
        Self {
            target,
            kind: StatEdgeKind::Break,
            closure: Some(closure),
        }
    }

    /// Creates a continue edge re-entering the loop `closure`.
    #[must_use]
    pub const fn cont(target: StatementId, closure: StatementId) -> Self {
        Self {
            target,
            kind: StatEdgeKind::Continue,
            closure: Some(closure),
        }
    }

    /// Creates an exception edge.
    #[must_use]
    pub const fn exception(target: StatementId) -> Self {
        Self {
            target,
            kind: StatEdgeKind::Exception,
            closure: None,
        }
    }
}

/// One statement in the arena.
///
/// Owns its expression list (populated by expression lifting for `Basic`
/// leaves) and its outgoing [`StatEdge`]s. The parent reference is an index,
/// used for traversal only; ownership flows strictly root-down through the
/// child lists.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Arena index of this statement.
    pub id: StatementId,
    /// Parent statement, `None` for the root (and for detached statements).
    pub parent: Option<StatementId>,
    /// Variant and role data.
    pub kind: StatementKind,
    /// Child statements, in source order.
    pub children: Vec<StatementId>,
    /// Lifted expressions (populated on `Basic` leaves).
    pub exprs: Vec<Expr>,
    /// Outgoing edges.
    pub successors: Vec<StatEdge>,
    /// Entry basic block of the region this statement represents.
    pub entry_block: Option<BlockId>,
    /// Label number, assigned when a break/continue needs to name this
    /// statement explicitly.
    pub label: Option<usize>,
    /// Tombstone flag for statements dissolved by the enhancer.
    pub(crate) dead: bool,
}

impl Statement {
    fn new(id: StatementId, kind: StatementKind) -> Self {
        Self {
            id,
            parent: None,
            kind,
            children: Vec::new(),
            exprs: Vec::new(),
            successors: Vec::new(),
            entry_block: None,
            label: None,
            dead: false,
        }
    }

    /// Returns `true` if this statement was dissolved.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.dead
    }

    /// Returns `true` for `Basic` leaves.
    #[must_use]
    pub const fn is_basic(&self) -> bool {
        matches!(self.kind, StatementKind::Basic { .. })
    }

    /// Returns `true` for loops of any kind.
    #[must_use]
    pub const fn is_loop(&self) -> bool {
        matches!(self.kind, StatementKind::Loop { .. })
    }
}

/// The arena owning all statements of one method, rooted at a `Root`
/// statement with `[content, dummy-exit]` children.
#[derive(Debug, Clone)]
pub struct StatementTree {
    stmts: Vec<Statement>,
    root: StatementId,
    dummy_exit: StatementId,
}

impl StatementTree {
    /// Creates a tree containing only the root and its dummy exit.
    #[must_use]
    pub fn new() -> Self {
        let mut tree = Self {
            stmts: Vec::new(),
            root: StatementId::new(0),
            dummy_exit: StatementId::new(0),
        };
        let root = tree.add(StatementKind::Root);
        let dummy = tree.add(StatementKind::Dummy);
        tree.root = root;
        tree.dummy_exit = dummy;
        tree
    }

    /// Adds a detached statement to the arena.
    pub fn add(&mut self, kind: StatementKind) -> StatementId {
        let id = StatementId::new(self.stmts.len());
        self.stmts.push(Statement::new(id, kind));
        id
    }

    /// The root statement.
    #[must_use]
    pub const fn root(&self) -> StatementId {
        self.root
    }

    /// The dummy exit statement anchoring the method exit.
    #[must_use]
    pub const fn dummy_exit(&self) -> StatementId {
        self.dummy_exit
    }

    /// Returns the statement at `id`.
    #[must_use]
    pub fn stmt(&self, id: StatementId) -> &Statement {
        &self.stmts[id.index()]
    }

    /// Returns the statement at `id` mutably.
    pub fn stmt_mut(&mut self, id: StatementId) -> &mut Statement {
        &mut self.stmts[id.index()]
    }

    /// Number of arena slots, including dead statements.
    #[must_use]
    pub fn arena_len(&self) -> usize {
        self.stmts.len()
    }

    /// Iterates over live statements.
    pub fn live(&self) -> impl Iterator<Item = &Statement> + '_ {
        self.stmts.iter().filter(|s| !s.dead)
    }

    /// Appends `child` to `parent`'s child list and sets its parent link.
    pub fn attach(&mut self, parent: StatementId, child: StatementId) {
        self.stmts[parent.index()].children.push(child);
        self.stmts[child.index()].parent = Some(parent);
    }

    /// Detaches `child` from its parent without tombstoning it.
    pub fn detach(&mut self, child: StatementId) {
        if let Some(parent) = self.stmts[child.index()].parent.take() {
            self.stmts[parent.index()].children.retain(|&c| c != child);
        }
    }

    /// Tombstones a statement and removes every edge referencing it.
    pub fn dissolve(&mut self, id: StatementId) {
        self.detach(id);
        self.stmts[id.index()].dead = true;
        self.stmts[id.index()].successors.clear();
        for stmt in &mut self.stmts {
            stmt.successors.retain(|e| e.target != id);
        }
    }

    /// Adds an outgoing edge to `source`.
    pub fn add_edge(&mut self, source: StatementId, edge: StatEdge) {
        self.stmts[source.index()].successors.push(edge);
    }

    /// Removes all edges from `source` to `target` of the given kind.
    pub fn remove_edge(&mut self, source: StatementId, target: StatementId, kind: StatEdgeKind) {
        self.stmts[source.index()]
            .successors
            .retain(|e| !(e.target == target && e.kind == kind));
    }

    /// Incoming edges of `target`, as `(source, edge)` pairs.
    ///
    /// Derived by scanning the arena; trees are method-sized, so the scan is
    /// cheap and avoids a second index to keep consistent.
    #[must_use]
    pub fn predecessors(&self, target: StatementId) -> Vec<(StatementId, StatEdge)> {
        let mut preds = Vec::new();
        for stmt in self.live() {
            for edge in &stmt.successors {
                if edge.target == target {
                    preds.push((stmt.id, *edge));
                }
            }
        }
        preds
    }

    /// Returns `true` if `ancestor` contains `descendant` (reflexive).
    #[must_use]
    pub fn contains(&self, ancestor: StatementId, descendant: StatementId) -> bool {
        let mut current = Some(descendant);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.stmts[id.index()].parent;
        }
        false
    }

    /// Walks from `id` towards the root, yielding `id` first.
    pub fn ancestors(&self, id: StatementId) -> impl Iterator<Item = StatementId> + '_ {
        let mut current = Some(id);
        std::iter::from_fn(move || {
            let id = current?;
            current = self.stmts[id.index()].parent;
            Some(id)
        })
    }

    /// Innermost enclosing loop of `id`, if any (excluding `id` itself).
    #[must_use]
    pub fn enclosing_loop(&self, id: StatementId) -> Option<StatementId> {
        self.ancestors(id).skip(1).find(|&a| self.stmt(a).is_loop())
    }

    /// Collects every basic block represented beneath `id`, in tree order.
    #[must_use]
    pub fn collect_blocks(&self, id: StatementId) -> Vec<BlockId> {
        let mut blocks = Vec::new();
        self.collect_blocks_into(id, &mut blocks);
        blocks
    }

    fn collect_blocks_into(&self, id: StatementId, out: &mut Vec<BlockId>) {
        let stmt = self.stmt(id);
        if let StatementKind::Basic { block } = stmt.kind {
            out.push(block);
        }
        for &child in &stmt.children {
            self.collect_blocks_into(child, out);
        }
    }

    /// Pre-order traversal of the live tree from the root.
    #[must_use]
    pub fn preorder(&self) -> Vec<StatementId> {
        let mut out = Vec::new();
        self.preorder_into(self.root, &mut out);
        out
    }

    fn preorder_into(&self, id: StatementId, out: &mut Vec<StatementId>) {
        if self.stmt(id).dead {
            return;
        }
        out.push(id);
        for &child in &self.stmt(id).children.clone() {
            self.preorder_into(child, out);
        }
    }

    /// All live `Basic` leaves in tree order.
    #[must_use]
    pub fn basic_leaves(&self) -> Vec<StatementId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.stmt(id).is_basic())
            .collect()
    }
}

impl Default for StatementTree {
    fn default() -> Self {
        Self::new()
    }
}
