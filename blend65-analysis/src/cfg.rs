//! Control-flow graphs over function bodies.
//!
//! One node per statement, plus synthetic Entry/Exit, Branch, Merge, and
//! loop nodes. The builder keeps a *current insertion point*; statements
//! append nodes, control flow forks and re-joins it, and `return`/`break`/
//! `continue` terminate the current path by clearing it.

use std::fmt::Write as _;

use blend65_ast::{Ast, Diagnostic, DiagnosticCode, NodeId, NodeKind};
use blend65_semantics::{ModuleId, NodeRef};

use crate::graph::FlowGraph;

/// Handle of one CFG node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CfgNodeId(pub u32);

impl CfgNodeId {
    /// Index form for table lookups.
    pub const fn to_usize(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for CfgNodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// What a CFG node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CfgNodeKind {
    /// Synthetic function entry.
    Entry,
    /// Synthetic function exit.
    Exit,
    /// One statement.
    Statement,
    /// Guard of an `if` or `match`.
    Branch,
    /// Loop header; guard of `while`/`for`, re-test of `do`.
    LoopHeader,
    /// Loop exit landing pad.
    LoopExit,
    /// Join point after branching.
    Merge,
}

/// One node: kind, attached AST node, and edges.
#[derive(Debug, Clone)]
pub struct CfgNode {
    /// Handle.
    pub id: CfgNodeId,
    /// Kind.
    pub kind: CfgNodeKind,
    /// Attached statement or guard expression, when one exists.
    pub statement: Option<NodeId>,
    /// Successors in edge-creation order.
    pub successors: Vec<CfgNodeId>,
    /// Predecessors in edge-creation order.
    pub predecessors: Vec<CfgNodeId>,
    /// Set by the reachability sweep.
    pub reachable: bool,
}

/// CFG of one function body.
#[derive(Debug, Clone)]
pub struct Cfg {
    /// Function declaration node this graph belongs to.
    pub function: NodeRef,
    nodes: Vec<CfgNode>,
    entry: CfgNodeId,
    exit: CfgNodeId,
}

impl Cfg {
    /// Entry node.
    pub fn entry(&self) -> CfgNodeId {
        self.entry
    }

    /// Exit node.
    pub fn exit(&self) -> CfgNodeId {
        self.exit
    }

    /// Borrow a node.
    pub fn node(&self, id: CfgNodeId) -> &CfgNode {
        &self.nodes[id.to_usize()]
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[CfgNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.successors.len()).sum()
    }

    /// True when `id` ends its path (no successors besides none).
    pub fn is_terminator(&self, id: CfgNodeId) -> bool {
        self.node(id).successors.is_empty()
    }

    /// Nodes whose attached statement is `stmt`.
    pub fn node_of_statement(&self, stmt: NodeId) -> Option<CfgNodeId> {
        self.nodes
            .iter()
            .find(|n| n.statement == Some(stmt))
            .map(|n| n.id)
    }

    /// DFS sweep from Entry, setting `reachable` on every visited node.
    pub fn compute_reachability(&mut self) {
        for node in &mut self.nodes {
            node.reachable = false;
        }
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id.to_usize()];
            if node.reachable {
                continue;
            }
            node.reachable = true;
            stack.extend(node.successors.iter().copied());
        }
    }

    /// True when some path from Entry reaches Exit.
    pub fn exit_is_reachable(&self) -> bool {
        self.node(self.exit).reachable
    }

    /// True when some path falls off the end of the function without a
    /// `return` statement.
    pub fn falls_off_the_end(&self, ast: &Ast) -> bool {
        self.node(self.exit)
            .predecessors
            .iter()
            .any(|&p| {
                let node = self.node(p);
                node.reachable
                    && !matches!(
                        node.statement.map(|s| ast.kind(s)),
                        Some(NodeKind::Return { .. })
                    )
            })
    }

    /// GraphViz rendering, deterministic for golden tests.
    pub fn to_dot(&self, ast: &Ast) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph cfg {{");
        for node in &self.nodes {
            let label = match node.statement {
                Some(stmt) => format!("{} {:?}", node.kind, std::mem::discriminant(ast.kind(stmt))),
                None => node.kind.to_string(),
            };
            let _ = writeln!(out, "  {} [label=\"{label}\"];", node.id.to_usize());
        }
        for node in &self.nodes {
            for succ in &node.successors {
                let _ = writeln!(out, "  {} -> {};", node.id.to_usize(), succ.to_usize());
            }
        }
        out.push_str("}\n");
        out
    }
}

impl FlowGraph for Cfg {
    fn len(&self) -> usize {
        self.nodes.len()
    }
    fn entry(&self) -> usize {
        self.entry.to_usize()
    }
    fn successors(&self, node: usize) -> Vec<usize> {
        self.nodes[node]
            .successors
            .iter()
            .map(|s| s.to_usize())
            .collect()
    }
    fn predecessors(&self, node: usize) -> Vec<usize> {
        self.nodes[node]
            .predecessors
            .iter()
            .map(|p| p.to_usize())
            .collect()
    }
}

struct LoopContext {
    entry: CfgNodeId,
    exit: CfgNodeId,
}

/// Builds a [`Cfg`] from a function body.
pub struct CfgBuilder<'a> {
    ast: &'a Ast,
    cfg: Cfg,
    current: Option<CfgNodeId>,
    loops: Vec<LoopContext>,
}

impl<'a> CfgBuilder<'a> {
    /// Build the CFG of the function declared at `function`.
    ///
    /// Returns `None` for stubs (no body).
    pub fn build(ast: &'a Ast, module: ModuleId, function: NodeId) -> Option<Cfg> {
        let NodeKind::FunctionDecl { body, .. } = ast.kind(function) else {
            return None;
        };
        let body = (*body)?;

        let mut cfg = Cfg {
            function: NodeRef::new(module, function),
            nodes: Vec::new(),
            entry: CfgNodeId(0),
            exit: CfgNodeId(0),
        };
        let entry = push_node(&mut cfg, CfgNodeKind::Entry, None);
        let exit = push_node(&mut cfg, CfgNodeKind::Exit, None);
        cfg.entry = entry;
        cfg.exit = exit;

        let mut builder = CfgBuilder {
            ast,
            cfg,
            current: Some(entry),
            loops: Vec::new(),
        };
        builder.visit_statement(body);
        if let Some(tail) = builder.current {
            builder.link(tail, exit);
        }
        let mut cfg = builder.cfg;
        cfg.compute_reachability();
        Some(cfg)
    }

    fn new_node(&mut self, kind: CfgNodeKind, statement: Option<NodeId>) -> CfgNodeId {
        push_node(&mut self.cfg, kind, statement)
    }

    fn link(&mut self, from: CfgNodeId, to: CfgNodeId) {
        if !self.cfg.nodes[from.to_usize()].successors.contains(&to) {
            self.cfg.nodes[from.to_usize()].successors.push(to);
            self.cfg.nodes[to.to_usize()].predecessors.push(from);
        }
    }

    /// Append a node after the current point and advance.
    fn append(&mut self, kind: CfgNodeKind, statement: Option<NodeId>) -> CfgNodeId {
        let node = self.new_node(kind, statement);
        if let Some(current) = self.current {
            self.link(current, node);
        }
        self.current = Some(node);
        node
    }

    fn visit_statement(&mut self, stmt: NodeId) {
        match self.ast.kind(stmt) {
            NodeKind::Block { statements } => {
                for &s in statements {
                    self.visit_statement(s);
                }
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let (condition, then_branch, else_branch) =
                    (*condition, *then_branch, *else_branch);
                let branch = self.append(CfgNodeKind::Branch, Some(condition));

                self.current = Some(branch);
                self.visit_statement(then_branch);
                let then_tail = self.current;

                self.current = Some(branch);
                if let Some(else_branch) = else_branch {
                    self.visit_statement(else_branch);
                }
                let else_tail = self.current;

                let merge = self.new_node(CfgNodeKind::Merge, None);
                for tail in [then_tail, else_tail].into_iter().flatten() {
                    self.link(tail, merge);
                }
                // Both arms terminated: the merge stays unreachable and the
                // path ends here.
                self.current = if self.cfg.nodes[merge.to_usize()].predecessors.is_empty() {
                    None
                } else {
                    Some(merge)
                };
            }
            NodeKind::While { condition, body } => {
                let (condition, body) = (*condition, *body);
                let header = self.append(CfgNodeKind::LoopHeader, Some(condition));
                let exit = self.new_node(CfgNodeKind::LoopExit, None);
                // The loop may not run at all.
                self.link(header, exit);

                self.loops.push(LoopContext {
                    entry: header,
                    exit,
                });
                self.current = Some(header);
                self.visit_statement(body);
                if let Some(tail) = self.current {
                    self.link(tail, header);
                }
                self.loops.pop();
                self.current = Some(exit);
            }
            NodeKind::DoWhile { body, condition } => {
                let (body, condition) = (*body, *condition);
                let header = self.append(CfgNodeKind::LoopHeader, None);
                let exit = self.new_node(CfgNodeKind::LoopExit, None);
                // No forward header→exit edge: the body always runs once.

                self.loops.push(LoopContext {
                    entry: header,
                    exit,
                });
                self.current = Some(header);
                self.visit_statement(body);
                if self.current.is_some() {
                    let test = self.append(CfgNodeKind::Branch, Some(condition));
                    self.link(test, header);
                    self.link(test, exit);
                }
                self.loops.pop();
                self.current = Some(exit);
            }
            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let (init, condition, update, body) = (*init, *condition, *update, *body);
                if let Some(init) = init {
                    self.visit_statement(init);
                }
                let header = self.append(CfgNodeKind::LoopHeader, condition);
                let exit = self.new_node(CfgNodeKind::LoopExit, None);
                if condition.is_some() {
                    self.link(header, exit);
                }

                // `continue` re-enters at the update, which then re-tests.
                let update_node = update.map(|u| self.new_node(CfgNodeKind::Statement, Some(u)));
                self.loops.push(LoopContext {
                    entry: update_node.unwrap_or(header),
                    exit,
                });
                self.current = Some(header);
                self.visit_statement(body);
                if let Some(tail) = self.current {
                    match update_node {
                        Some(update_node) => self.link(tail, update_node),
                        None => self.link(tail, header),
                    }
                }
                if let Some(update_node) = update_node {
                    self.link(update_node, header);
                }
                self.loops.pop();
                self.current = Some(exit);
            }
            NodeKind::Match { scrutinee, arms } => {
                let (scrutinee, arms) = (*scrutinee, arms.clone());
                let branch = self.append(CfgNodeKind::Branch, Some(scrutinee));
                let merge = self.new_node(CfgNodeKind::Merge, None);
                let mut any_default = false;
                for arm in &arms {
                    any_default |= arm.pattern.is_none();
                    self.current = Some(branch);
                    self.visit_statement(arm.body);
                    if let Some(tail) = self.current {
                        self.link(tail, merge);
                    }
                }
                if !any_default {
                    // No default arm: the scrutinee may match nothing.
                    self.link(branch, merge);
                }
                if self.cfg.nodes[merge.to_usize()].predecessors.is_empty() {
                    self.current = None;
                } else {
                    self.current = Some(merge);
                }
            }
            NodeKind::Return { .. } => {
                let node = self.append(CfgNodeKind::Statement, Some(stmt));
                let exit = self.cfg.exit;
                self.link(node, exit);
                self.current = None;
            }
            NodeKind::Break => {
                let node = self.append(CfgNodeKind::Statement, Some(stmt));
                if let Some(target) = self.loops.last().map(|l| l.exit) {
                    self.link(node, target);
                }
                self.current = None;
            }
            NodeKind::Continue => {
                let node = self.append(CfgNodeKind::Statement, Some(stmt));
                if let Some(target) = self.loops.last().map(|l| l.entry) {
                    self.link(node, target);
                }
                self.current = None;
            }
            NodeKind::Error => {}
            _ => {
                self.append(CfgNodeKind::Statement, Some(stmt));
            }
        }
    }
}

fn push_node(cfg: &mut Cfg, kind: CfgNodeKind, statement: Option<NodeId>) -> CfgNodeId {
    let id = CfgNodeId(u32::try_from(cfg.nodes.len()).expect("CFG node count exceeds u32"));
    cfg.nodes.push(CfgNode {
        id,
        kind,
        statement,
        successors: Vec::new(),
        predecessors: Vec::new(),
        reachable: false,
    });
    id
}

/// Reachability diagnostics of one function's CFG.
pub fn reachability_diagnostics(cfg: &Cfg, ast: &Ast) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for node in cfg.nodes() {
        if !node.reachable && node.kind == CfgNodeKind::Statement {
            if let Some(stmt) = node.statement {
                diagnostics.push(
                    Diagnostic::warning(DiagnosticCode::UnreachableCode, "statement can never run")
                        .at(ast.location(stmt).clone()),
                );
            }
        }
    }
    diagnostics
}
