//! Statement tree construction by graph reduction.
//!
//! The CFG is folded bottom-up: every live block starts as a `Basic` leaf,
//! and reduction rules repeatedly collapse recognized shapes (straight
//! lines, triangles and diamonds, switch fans, protected regions, self
//! loops) into composite statements until a single region remains. Each
//! rule replaces a small set of region nodes with one new node, so the
//! process terminates on any input; graphs that stall before reaching a
//! single node (irreducible control flow) are folded into one `Sequence`
//! in block order as a last resort.
//!
//! Conditional polarity is positional: an `If` statement's then-child is
//! whichever branch region collapsed, and the finisher recovers the source
//! condition by comparing the then-child's entry block against the head
//! block's successor order in the CFG.

use std::collections::{HashMap, HashSet};

use crate::{
    bytecode::Opcode,
    cfg::{BlockId, ControlFlowGraph, DominatorTree},
    stmt::{
        IfKind, LoopKind, StatEdge, Statement, StatementId, StatementKind, StatementTree,
    },
};

/// Builds the statement tree for a normalized graph.
///
/// The graph must already have its synthetic exit attached; edges to the
/// exit are not part of the reduction and surface as regular statement
/// edges to the tree's dummy exit instead.
#[must_use]
pub fn parse(graph: &ControlFlowGraph) -> StatementTree {
    let mut parser = Parser::init(graph);
    parser.reduce();
    let mut tree = parser.finish();
    derive_edges(graph, &mut tree);
    tree
}

/// One live protected range, snapshotted for the duration of the parse.
struct RangeShape {
    body: HashSet<BlockId>,
    handler: BlockId,
    collapsed: bool,
}

struct Parser<'g> {
    graph: &'g ControlFlowGraph,
    tree: StatementTree,
    /// Ordered regular successors per region node. Duplicates are kept so
    /// the first occurrence preserves branch-target-before-fall-through
    /// ordering.
    succs: HashMap<StatementId, Vec<StatementId>>,
    preds: HashMap<StatementId, Vec<StatementId>>,
    /// Blocks covered by each region node.
    node_blocks: HashMap<StatementId, Vec<BlockId>>,
    /// Current owning region of each block.
    block_node: HashMap<BlockId, StatementId>,
    ranges: Vec<RangeShape>,
    entry_node: StatementId,
    /// Region nodes in reverse postorder of their entry blocks. Rules scan
    /// in this order, which keeps the reduction deterministic.
    order: Vec<StatementId>,
}

impl<'g> Parser<'g> {
    fn init(graph: &'g ControlFlowGraph) -> Self {
        let mut tree = StatementTree::new();
        let mut block_node = HashMap::new();
        let mut node_blocks = HashMap::new();

        for block in graph.live_blocks() {
            if Some(block.id) == graph.exit() {
                continue;
            }
            let id = tree.add(StatementKind::Basic { block: block.id });
            tree.stmt_mut(id).entry_block = Some(block.id);
            block_node.insert(block.id, id);
            node_blocks.insert(id, vec![block.id]);
        }

        let mut succs: HashMap<StatementId, Vec<StatementId>> = HashMap::new();
        let mut preds: HashMap<StatementId, Vec<StatementId>> = HashMap::new();
        for (&block, &node) in &block_node {
            let out: Vec<StatementId> = graph
                .regular_successors(block)
                .filter_map(|t| block_node.get(&t).copied())
                .collect();
            for &target in &out {
                preds.entry(target).or_default().push(node);
            }
            succs.insert(node, out);
        }
        for &node in block_node.values() {
            preds.entry(node).or_default();
        }

        let ranges = graph
            .live_ranges()
            .map(|r| RangeShape {
                body: r.body.iter().copied().collect(),
                handler: r.handler,
                collapsed: false,
            })
            .collect();

        let entry_node = block_node[&graph.entry()];

        let dom = DominatorTree::compute(graph);
        let mut order: Vec<StatementId> = dom
            .reverse_postorder_blocks()
            .iter()
            .filter_map(|b| block_node.get(b).copied())
            .collect();
        for block in graph.live_blocks() {
            if let Some(&node) = block_node.get(&block.id) {
                if !order.contains(&node) {
                    order.push(node);
                }
            }
        }

        Self {
            graph,
            tree,
            succs,
            preds,
            node_blocks,
            block_node,
            ranges,
            entry_node,
            order,
        }
    }

    /// Deduplicated successors of a node.
    fn eff_succs(&self, node: StatementId) -> Vec<StatementId> {
        let mut seen = HashSet::new();
        self.succs[&node]
            .iter()
            .copied()
            .filter(|s| seen.insert(*s))
            .collect()
    }

    fn eff_preds(&self, node: StatementId) -> Vec<StatementId> {
        let mut seen = HashSet::new();
        self.preds[&node]
            .iter()
            .copied()
            .filter(|p| seen.insert(*p))
            .collect()
    }

    fn has_self_edge(&self, node: StatementId) -> bool {
        self.succs[&node].contains(&node)
    }

    /// Two nodes are mergeable only when every live range covers both or
    /// neither; merging across a range boundary would make the protected
    /// body unrecoverable.
    fn same_protection(&self, a: StatementId, b: StatementId) -> bool {
        self.ranges.iter().filter(|r| !r.collapsed).all(|r| {
            let ia = self.node_blocks[&a].iter().any(|blk| r.body.contains(blk));
            let ib = self.node_blocks[&b].iter().any(|blk| r.body.contains(blk));
            ia == ib
        })
    }

    /// Replaces `members` with `new_id` in the region graph. `new_succs`
    /// must already name surviving nodes (members mapped to `new_id` where
    /// a back edge should become a self edge).
    fn replace(&mut self, members: &[StatementId], new_id: StatementId, new_succs: Vec<StatementId>) {
        let member_set: HashSet<StatementId> = members.iter().copied().collect();

        // Unlink member out-edges from target pred lists.
        for &m in members {
            for &t in &self.succs[&m] {
                if !member_set.contains(&t) {
                    if let Some(p) = self.preds.get_mut(&t) {
                        if let Some(pos) = p.iter().position(|&x| x == m) {
                            p.remove(pos);
                        }
                    }
                }
            }
        }

        // Rewire external predecessors onto the new node.
        let mut new_preds = Vec::new();
        for &m in members {
            for &p in &self.preds[&m] {
                if member_set.contains(&p) {
                    continue;
                }
                for slot in self.succs.get_mut(&p).into_iter().flatten() {
                    if *slot == m {
                        *slot = new_id;
                    }
                }
                new_preds.push(p);
            }
        }

        for &t in &new_succs {
            if t != new_id {
                self.preds.entry(t).or_default().push(new_id);
            } else {
                new_preds.push(new_id);
            }
        }

        let mut blocks = Vec::new();
        for &m in members {
            if let Some(mut b) = self.node_blocks.remove(&m) {
                blocks.append(&mut b);
            }
            self.succs.remove(&m);
            self.preds.remove(&m);
        }
        for &b in &blocks {
            self.block_node.insert(b, new_id);
        }
        self.node_blocks.insert(new_id, blocks);
        self.succs.insert(new_id, new_succs);
        self.preds.insert(new_id, new_preds);

        if member_set.contains(&self.entry_node) {
            self.entry_node = new_id;
        }

        let first = self
            .order
            .iter()
            .position(|n| member_set.contains(n))
            .unwrap_or(0);
        self.order[first] = new_id;
        self.order
            .retain(|n| !member_set.contains(n) || *n == new_id);
    }

    fn new_composite(&mut self, kind: StatementKind, children: &[StatementId]) -> StatementId {
        let id = self.tree.add(kind);
        for &child in children {
            self.tree.attach(id, child);
        }
        self.tree.stmt_mut(id).entry_block = self.tree.stmt(children[0]).entry_block;
        id
    }

    fn reduce(&mut self) {
        loop {
            if self.try_catch_rule()
                || self.switch_rule()
                || self.if_rule()
                || self.sequence_rule(true)
                || self.self_loop_rule()
                || self.sequence_rule(false)
            {
                continue;
            }
            break;
        }
    }

    /// Folds a fully collapsed protected range and its handlers into a
    /// `TryCatch`. Smaller ranges fold first so nesting comes out right.
    fn try_catch_rule(&mut self) -> bool {
        let mut order: Vec<usize> = (0..self.ranges.len())
            .filter(|&i| !self.ranges[i].collapsed)
            .collect();
        order.sort_by_key(|&i| self.ranges[i].body.len());

        for i in order {
            let (body_node, handler_node) = {
                let range = &self.ranges[i];
                let Some(&first) = range.body.iter().next() else {
                    continue;
                };
                let Some(&body_node) = self.block_node.get(&first) else {
                    continue;
                };
                // The whole body, and nothing else, must sit in one node.
                let covered: HashSet<BlockId> =
                    self.node_blocks[&body_node].iter().copied().collect();
                if covered != range.body {
                    continue;
                }
                let Some(&handler_node) = self.block_node.get(&range.handler) else {
                    continue;
                };
                // Handlers are entered only through exceptions; a regular
                // predecessor means deobfuscation left this shape behind.
                if handler_node == body_node || !self.eff_preds(handler_node).is_empty() {
                    continue;
                }
                if self.tree.stmt(handler_node).entry_block != Some(range.handler) {
                    continue;
                }
                (body_node, handler_node)
            };

            // Sibling ranges over the identical body become extra handlers.
            let mut handler_nodes = vec![handler_node];
            let mut collapsed_ranges = vec![i];
            for j in 0..self.ranges.len() {
                if j == i || self.ranges[j].collapsed || self.ranges[j].body != self.ranges[i].body
                {
                    continue;
                }
                if let Some(&h) = self.block_node.get(&self.ranges[j].handler) {
                    if h != body_node
                        && !handler_nodes.contains(&h)
                        && self.eff_preds(h).is_empty()
                        && self.tree.stmt(h).entry_block == Some(self.ranges[j].handler)
                    {
                        handler_nodes.push(h);
                        collapsed_ranges.push(j);
                    }
                }
            }

            let mut members = vec![body_node];
            members.extend(&handler_nodes);
            let new_id = self.new_composite(StatementKind::TryCatch { finally: false }, &members);

            let member_set: HashSet<StatementId> = members.iter().copied().collect();
            let mut new_succs = Vec::new();
            for &m in &members {
                for &t in &self.succs[&m] {
                    new_succs.push(if member_set.contains(&t) { new_id } else { t });
                }
            }
            self.replace(&members, new_id, new_succs);
            for j in collapsed_ranges {
                self.ranges[j].collapsed = true;
            }
            return true;
        }
        false
    }

    /// Folds a switch head and its single-key case regions.
    fn switch_rule(&mut self) -> bool {
        let candidates: Vec<StatementId> = self
            .order
            .iter()
            .copied()
            .filter(|&n| self.is_switch_head(n))
            .collect();

        'next: for head in candidates {
            let StatementKind::Basic { block } = self.tree.stmt(head).kind else {
                continue;
            };
            let Some(Opcode::Switch { keys, .. }) =
                self.graph.block(block).terminator().map(|i| &i.opcode)
            else {
                continue;
            };

            // Raw CFG edge order is case targets followed by the default.
            let raw: Vec<StatementId> = self
                .graph
                .regular_successors(block)
                .filter_map(|t| self.block_node.get(&t).copied())
                .collect();
            if raw.len() != keys.len() + 1 {
                continue;
            }

            // Key per region; regions fed by several keys stay unreduced
            // and fall through to the generic rules.
            let mut regions: Vec<(StatementId, Option<i32>)> = Vec::new();
            for (idx, &node) in raw.iter().enumerate() {
                let key = keys.get(idx).copied();
                if regions.iter().any(|&(n, _)| n == node) {
                    continue 'next;
                }
                regions.push((node, key));
            }

            // Split into case bodies (entered only from the head) and the
            // shared join the bodies fall out to.
            let mut join: Option<StatementId> = None;
            let mut cases: Vec<(StatementId, Option<i32>)> = Vec::new();
            for &(node, key) in &regions {
                let preds = self.eff_preds(node);
                if preds == vec![head] {
                    cases.push((node, key));
                } else if join.is_none() || join == Some(node) {
                    join = Some(node);
                } else {
                    continue 'next;
                }
            }
            if cases.is_empty() {
                continue;
            }
            for &(node, _) in &cases {
                let out = self.eff_succs(node);
                match (out.len(), join) {
                    (0, _) => {}
                    (1, Some(j)) if out[0] == j => {}
                    (1, None) => join = Some(out[0]),
                    _ => continue 'next,
                }
            }
            if let Some(j) = join {
                if cases.iter().any(|&(n, _)| n == j) || j == head {
                    continue;
                }
            }

            let mut members = vec![head];
            let mut case_keys = Vec::new();
            for &(node, key) in &cases {
                members.push(node);
                case_keys.push(key);
            }
            let new_id =
                self.new_composite(StatementKind::Switch { cases: case_keys }, &members);
            let new_succs = join.into_iter().collect();
            self.replace(&members, new_id, new_succs);
            return true;
        }
        false
    }

    fn is_switch_head(&self, node: StatementId) -> bool {
        let StatementKind::Basic { block } = self.tree.stmt(node).kind else {
            return false;
        };
        matches!(
            self.graph.block(block).terminator().map(|i| &i.opcode),
            Some(Opcode::Switch { .. })
        )
    }

    /// Folds triangles (`if`) and diamonds (`if/else`). A branch region
    /// qualifies when the head is its only way in and it either exits or
    /// rejoins the other arm.
    fn if_rule(&mut self) -> bool {
        let nodes: Vec<StatementId> = self.order.clone();
        for head in nodes {
            if self.is_switch_head(head) {
                continue;
            }
            let out = self.eff_succs(head);
            if out.len() != 2 || out.contains(&head) {
                continue;
            }
            let (s1, s2) = (out[0], out[1]);

            // Diamond: both arms private to the head, same join.
            let arms_private = self.eff_preds(s1) == vec![head] && self.eff_preds(s2) == vec![head];
            if arms_private {
                let (o1, o2) = (self.eff_succs(s1), self.eff_succs(s2));
                let joined = o1.len() <= 1
                    && o1 == o2
                    && !o1.contains(&s1)
                    && !o1.contains(&s2)
                    && !o1.contains(&head);
                if joined
                    && self.same_protection(head, s1)
                    && self.same_protection(head, s2)
                    && s1 != self.entry_node
                    && s2 != self.entry_node
                {
                    let new_id = self.new_composite(
                        StatementKind::If { kind: IfKind::IfElse },
                        // Fall-through arm is the then-branch.
                        &[head, s2, s1],
                    );
                    self.replace(&[head, s1, s2], new_id, o1);
                    return true;
                }
            }

            // Triangle: one arm private to the head, exiting or rejoining
            // the other arm.
            for (arm, other) in [(s2, s1), (s1, s2)] {
                if arm == self.entry_node
                    || self.eff_preds(arm) != vec![head]
                    || !self.same_protection(head, arm)
                {
                    continue;
                }
                let arm_out = self.eff_succs(arm);
                let rejoins = arm_out.is_empty() || arm_out == vec![other];
                if !rejoins {
                    continue;
                }
                let new_id =
                    self.new_composite(StatementKind::If { kind: IfKind::If }, &[head, arm]);
                self.replace(&[head, arm], new_id, vec![other]);
                return true;
            }
        }
        false
    }

    /// Merges a node into its unique predecessor, forming a `Sequence`.
    ///
    /// In strict mode the predecessor must fall straight through (a single
    /// successor); the relaxed mode also glues loop headers to their
    /// bodies, leaving the back edge as a self edge for the loop rule.
    fn sequence_rule(&mut self, strict: bool) -> bool {
        let nodes: Vec<StatementId> = self.order.clone();
        for b in nodes {
            if b == self.entry_node {
                continue;
            }
            let preds = self.eff_preds(b);
            if preds.len() != 1 || preds[0] == b {
                continue;
            }
            let a = preds[0];
            if strict && self.eff_succs(a) != vec![b] {
                continue;
            }
            if !self.same_protection(a, b) {
                continue;
            }
            if self.has_self_edge(a) {
                continue;
            }

            let new_id = self.new_composite(StatementKind::Sequence, &[a, b]);
            let mut new_succs: Vec<StatementId> = Vec::new();
            for &t in &self.succs[&a] {
                if t != b {
                    new_succs.push(if t == a { new_id } else { t });
                }
            }
            for &t in &self.succs[&b] {
                new_succs.push(if t == a || t == b { new_id } else { t });
            }
            self.replace(&[a, b], new_id, new_succs);
            return true;
        }
        false
    }

    /// Wraps a node carrying a self edge into an unconditional loop.
    fn self_loop_rule(&mut self) -> bool {
        let nodes: Vec<StatementId> = self.order.clone();
        for n in nodes {
            if !self.has_self_edge(n) {
                continue;
            }
            let new_id = self.new_composite(
                StatementKind::Loop {
                    kind: LoopKind::Unconditional,
                },
                &[n],
            );
            let new_succs: Vec<StatementId> =
                self.succs[&n].iter().copied().filter(|&t| t != n).collect();
            self.replace(&[n], new_id, new_succs);
            return true;
        }
        false
    }

    /// Attaches the reduced region to the root. Stalled reductions fold
    /// the leftovers into one `Sequence` in block order.
    fn finish(mut self) -> StatementTree {
        let remaining: Vec<StatementId> = self.order.clone();
        let content = if remaining.len() == 1 {
            remaining[0]
        } else {
            let seq = self.tree.add(StatementKind::Sequence);
            for &n in &remaining {
                self.tree.attach(seq, n);
            }
            self.tree.stmt_mut(seq).entry_block = self.tree.stmt(remaining[0]).entry_block;
            seq
        };

        let root = self.tree.root();
        let dummy = self.tree.dummy_exit();
        self.tree.attach(root, content);
        self.tree.attach(root, dummy);
        self.tree.stmt_mut(root).entry_block = self.tree.stmt(content).entry_block;
        self.tree
    }
}

/// Derives statement-level edges from the CFG after the tree is built.
///
/// Every regular CFG edge out of a basic leaf becomes either a regular
/// edge (fall-through to the structurally next region), a continue (jump
/// to an enclosing loop's header), or a break out of the child of the
/// lowest common ancestor that contains the source.
pub fn derive_edges(graph: &ControlFlowGraph, tree: &mut StatementTree) {
    let leaf_of: HashMap<BlockId, StatementId> = tree
        .basic_leaves()
        .into_iter()
        .filter_map(|id| match tree.stmt(id).kind {
            StatementKind::Basic { block } => Some((block, id)),
            _ => None,
        })
        .collect();

    let mut new_edges: Vec<(StatementId, StatEdge)> = Vec::new();
    for (&block, &leaf) in &leaf_of {
        for target in graph.regular_successors(block) {
            if Some(target) == graph.exit() {
                new_edges.push((leaf, StatEdge::regular(tree.dummy_exit())));
                continue;
            }
            let Some(&target_leaf) = leaf_of.get(&target) else {
                continue;
            };

            if let Some(lp) = tree
                .ancestors(leaf)
                .find(|&a| tree.stmt(a).is_loop() && tree.stmt(a).entry_block == Some(target))
            {
                new_edges.push((leaf, StatEdge::cont(target_leaf, lp)));
                continue;
            }

            new_edges.push(classify_forward(tree, leaf, target_leaf, target));
        }
    }
    for (source, edge) in new_edges {
        tree.add_edge(source, edge);
    }
}

fn classify_forward(
    tree: &StatementTree,
    leaf: StatementId,
    target_leaf: StatementId,
    target: BlockId,
) -> (StatementId, StatEdge) {
    let source_chain: Vec<StatementId> = tree.ancestors(leaf).collect();
    let source_set: HashSet<StatementId> = source_chain.iter().copied().collect();

    let mut lca = target_leaf;
    let mut target_child = target_leaf;
    for anc in tree.ancestors(target_leaf) {
        if source_set.contains(&anc) {
            lca = anc;
            break;
        }
        target_child = anc;
    }
    let source_child = source_chain
        .iter()
        .copied()
        .take_while(|&a| a != lca)
        .last()
        .unwrap_or(leaf);

    let lca_stmt: &Statement = tree.stmt(lca);
    let structural = match lca_stmt.kind {
        StatementKind::Sequence | StatementKind::Root => {
            let children = &lca_stmt.children;
            let si = children.iter().position(|&c| c == source_child);
            let ti = children.iter().position(|&c| c == target_child);
            matches!((si, ti), (Some(s), Some(t)) if t == s + 1)
                && tree.stmt(target_child).entry_block == Some(target)
        }
        StatementKind::If { .. }
        | StatementKind::Switch { .. }
        | StatementKind::TryCatch { .. }
        | StatementKind::Synchronized => lca_stmt.children.first() == Some(&source_child),
        _ => false,
    };

    if structural || lca == target_leaf {
        (leaf, StatEdge::regular(target_leaf))
    } else {
        (leaf, StatEdge::brk(target_leaf, source_child))
    }
}
