//! The shared data-flow skeleton.
//!
//! Every analysis instantiates [`solve`] with a direction, a meet, and a
//! transfer function over per-node facts. Monotone transfers on finite
//! lattices converge; the iteration cap is a tripwire for bugs, not a
//! tuning knob.

pub mod constants;
pub mod cse;
pub mod gvn;
pub mod liveness;
pub mod reaching;
pub mod usage;

use std::collections::BTreeSet;

use blend65_ast::{Ast, NodeId, NodeKind};
use blend65_semantics::{ModuleId, NodeRef, SymbolId, SymbolKind, SymbolTable};

use crate::cfg::{Cfg, CfgNodeId};

/// Which way facts flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Facts flow from predecessors to successors.
    Forward,
    /// Facts flow from successors to predecessors.
    Backward,
}

/// Fixed point of one analysis.
#[derive(Debug, Clone)]
pub struct Solution<F> {
    /// Fact entering each node, indexed by [`CfgNodeId`].
    pub inputs: Vec<F>,
    /// Fact leaving each node.
    pub outputs: Vec<F>,
    /// Full passes over the graph until nothing changed.
    pub iterations: usize,
    /// False when the iteration cap was hit first.
    pub converged: bool,
}

/// Run a worklist to fixed point.
///
/// Nodes are visited in reverse post-order (forward) or its reverse
/// (backward), which keeps iteration counts near the loop-nesting depth.
pub fn solve<F>(
    cfg: &Cfg,
    direction: Direction,
    bottom: F,
    meet: impl Fn(&F, &F) -> F,
    transfer: impl Fn(CfgNodeId, &F) -> F,
    max_iterations: usize,
) -> Solution<F>
where
    F: Clone + PartialEq,
{
    let len = cfg.node_count();
    let mut inputs = vec![bottom.clone(); len];
    let mut outputs = vec![bottom.clone(); len];

    let mut order: Vec<CfgNodeId> = {
        use crate::graph::FlowGraph;
        let mut visited = vec![false; len];
        let mut post = Vec::with_capacity(len);
        fn dfs(cfg: &Cfg, n: usize, visited: &mut [bool], post: &mut Vec<usize>) {
            if visited[n] {
                return;
            }
            visited[n] = true;
            for s in cfg.successors(n) {
                dfs(cfg, s, visited, post);
            }
            post.push(n);
        }
        dfs(cfg, cfg.entry().to_usize(), &mut visited, &mut post);
        post.reverse();
        post.into_iter().map(|n| CfgNodeId(n as u32)).collect()
    };
    if direction == Direction::Backward {
        order.reverse();
    }

    let mut iterations = 0;
    let mut changed = true;
    while changed && iterations < max_iterations {
        changed = false;
        iterations += 1;
        for &node in &order {
            let i = node.to_usize();
            match direction {
                Direction::Forward => {
                    let mut input = bottom.clone();
                    for pred in &cfg.node(node).predecessors {
                        input = meet(&input, &outputs[pred.to_usize()]);
                    }
                    let output = transfer(node, &input);
                    if inputs[i] != input || outputs[i] != output {
                        inputs[i] = input;
                        outputs[i] = output;
                        changed = true;
                    }
                }
                Direction::Backward => {
                    let mut output = bottom.clone();
                    for succ in &cfg.node(node).successors {
                        output = meet(&output, &inputs[succ.to_usize()]);
                    }
                    let input = transfer(node, &output);
                    if inputs[i] != input || outputs[i] != output {
                        inputs[i] = input;
                        outputs[i] = output;
                        changed = true;
                    }
                }
            }
        }
    }

    Solution {
        inputs,
        outputs,
        iterations,
        converged: !changed,
    }
}

/// USE/DEF sets of one CFG node's attached AST node.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UseDef {
    /// Variables read before any write in the node.
    pub uses: BTreeSet<SymbolId>,
    /// Variables written by the node.
    pub defs: BTreeSet<SymbolId>,
}

/// Compute USE/DEF for every CFG node.
pub fn use_def_sets(cfg: &Cfg, ast: &Ast, table: &SymbolTable, module: ModuleId) -> Vec<UseDef> {
    cfg.nodes()
        .iter()
        .map(|node| match node.statement {
            Some(attached) => node_use_def(ast, table, module, attached),
            None => UseDef::default(),
        })
        .collect()
}

/// USE/DEF of a single statement or guard expression.
pub fn node_use_def(ast: &Ast, table: &SymbolTable, module: ModuleId, node: NodeId) -> UseDef {
    let mut out = UseDef::default();
    collect(ast, table, module, node, &mut out);
    out
}

fn variable_symbol(table: &SymbolTable, module: ModuleId, node: NodeId) -> Option<SymbolId> {
    let symbol = table.resolution(NodeRef::new(module, node))?;
    matches!(
        table.symbol(symbol).kind,
        SymbolKind::Variable | SymbolKind::Constant | SymbolKind::Parameter | SymbolKind::Import
    )
    .then_some(symbol)
}

fn collect(ast: &Ast, table: &SymbolTable, module: ModuleId, node: NodeId, out: &mut UseDef) {
    match ast.kind(node) {
        NodeKind::VariableDecl { initializer, .. } => {
            if let Some(init) = initializer {
                walk_expr(ast, table, module, *init, out);
                if let Some(symbol) = table.declaration_at(module, node) {
                    out.defs.insert(symbol);
                }
            }
        }
        NodeKind::ExpressionStmt { expression } => {
            collect(ast, table, module, *expression, out)
        }
        NodeKind::Return { value } => {
            if let Some(value) = value {
                walk_expr(ast, table, module, *value, out);
            }
        }
        NodeKind::Assignment { target, value } => {
            walk_expr(ast, table, module, *value, out);
            match ast.kind(*target) {
                NodeKind::Identifier(_) => {
                    if let Some(symbol) = variable_symbol(table, module, *target) {
                        out.defs.insert(symbol);
                    }
                }
                // Compound targets read their base and index.
                NodeKind::Index { base, index } => {
                    walk_expr(ast, table, module, *index, out);
                    if let Some(symbol) = variable_symbol(table, module, *base) {
                        out.uses.insert(symbol);
                    }
                }
                NodeKind::Member { base, .. } => {
                    if let Some(symbol) = variable_symbol(table, module, *base) {
                        out.uses.insert(symbol);
                    }
                }
                _ => walk_expr(ast, table, module, *target, out),
            }
        }
        kind if kind.is_expression() => walk_expr(ast, table, module, node, out),
        // Control statements attach their guards separately; nothing to do.
        _ => {}
    }
}

fn walk_expr(ast: &Ast, table: &SymbolTable, module: ModuleId, node: NodeId, out: &mut UseDef) {
    match ast.kind(node) {
        NodeKind::Identifier(_) => {
            if let Some(symbol) = variable_symbol(table, module, node) {
                // Read before any write in this node counts as a use.
                if !out.defs.contains(&symbol) {
                    out.uses.insert(symbol);
                }
            }
        }
        NodeKind::Assignment { .. } => collect(ast, table, module, node, out),
        NodeKind::Call { arguments, .. } => {
            for &arg in arguments {
                walk_expr(ast, table, module, arg, out);
            }
        }
        NodeKind::Member { base, .. } => {
            // Enum bases are type names; map bases are reads.
            if let Some(symbol) = variable_symbol(table, module, *base) {
                out.uses.insert(symbol);
            }
        }
        _ => {
            for child in ast.children(node) {
                walk_expr(ast, table, module, child, out);
            }
        }
    }
}
