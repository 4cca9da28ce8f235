//! Local common-subexpression detection.
//!
//! Within each straight-line run of CFG nodes, pure expressions check an
//! available-expression table keyed by structure and symbol identity; a
//! hit becomes a CSE-candidate annotation, a miss inserts. Calls and
//! volatile accesses flush the table.

use std::collections::BTreeMap;

use blend65_ast::{Ast, LiteralValue, NodeId, NodeKind};
use blend65_semantics::{ModuleId, NodeRef, SymbolId, SymbolTable};

use crate::cfg::{Cfg, CfgNodeId};
use crate::facts::FactTable;

/// CSE candidates found in one function.
#[derive(Debug, Default, Clone)]
pub struct CseResult {
    /// Redundant expression → node that first computed it.
    pub candidates: BTreeMap<NodeId, NodeId>,
}

/// Run local CSE over one function's CFG, writing candidate facts.
pub fn analyze(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    facts: &mut FactTable,
) -> CseResult {
    let mut result = CseResult::default();

    // Straight-line runs: start anywhere a fall-through chain cannot be
    // entered from the side, follow single-pred/single-succ links.
    let mut visited = vec![false; cfg.node_count()];
    for node in cfg.nodes() {
        let starts_run = node.predecessors.len() != 1
            || cfg
                .node(node.predecessors[0])
                .successors
                .len()
                != 1;
        if !starts_run || visited[node.id.to_usize()] {
            continue;
        }
        let mut run = Vec::new();
        let mut current = Some(node.id);
        while let Some(id) = current {
            if visited[id.to_usize()] {
                break;
            }
            visited[id.to_usize()] = true;
            run.push(id);
            let n = cfg.node(id);
            current = match n.successors.as_slice() {
                [next] if cfg.node(*next).predecessors.len() == 1 => Some(*next),
                _ => None,
            };
        }
        scan_run(&run, cfg, ast, table, module, facts, &mut result);
    }
    result
}

fn scan_run(
    run: &[CfgNodeId],
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    facts: &mut FactTable,
    result: &mut CseResult,
) {
    let mut available: BTreeMap<String, NodeId> = BTreeMap::new();
    for &id in run {
        let Some(attached) = cfg.node(id).statement else {
            continue;
        };
        scan_statement(ast, table, module, attached, &mut available, facts, result);
    }
}

fn scan_statement(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    node: NodeId,
    available: &mut BTreeMap<String, NodeId>,
    facts: &mut FactTable,
    result: &mut CseResult,
) {
    match ast.kind(node) {
        NodeKind::VariableDecl { initializer, .. } => {
            if let Some(init) = initializer {
                scan_expr(ast, table, module, *init, available, facts, result);
            }
            if let Some(symbol) = table.declaration_at(module, node) {
                kill_mentions(available, symbol);
            }
        }
        NodeKind::ExpressionStmt { expression } => {
            scan_statement(ast, table, module, *expression, available, facts, result)
        }
        NodeKind::Return { value } => {
            if let Some(value) = value {
                scan_expr(ast, table, module, *value, available, facts, result);
            }
        }
        NodeKind::Assignment { target, value } => {
            scan_expr(ast, table, module, *value, available, facts, result);
            if let Some(symbol) = table.resolution(NodeRef::new(module, *target)) {
                kill_mentions(available, symbol);
            }
        }
        kind if kind.is_expression() => {
            scan_expr(ast, table, module, node, available, facts, result)
        }
        _ => {}
    }
}

fn scan_expr(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    node: NodeId,
    available: &mut BTreeMap<String, NodeId>,
    facts: &mut FactTable,
    result: &mut CseResult,
) {
    // Side effects flush: a call may change anything it can reach.
    if let NodeKind::Call { .. } = ast.kind(node) {
        available.clear();
        return;
    }
    if let NodeKind::Assignment { .. } = ast.kind(node) {
        scan_statement(ast, table, module, node, available, facts, result);
        return;
    }
    for child in ast.children(node) {
        scan_expr(ast, table, module, child, available, facts, result);
    }
    if let Some(hash) = pure_hash(ast, table, module, node) {
        match available.get(&hash) {
            Some(&first) => {
                result.candidates.insert(node, first);
                facts.entry(NodeRef::new(module, node)).cse_available_from =
                    Some(NodeRef::new(module, first));
            }
            None => {
                available.insert(hash, node);
            }
        }
    }
}

/// Structural hash of a pure expression, or `None` when impure or trivial.
fn pure_hash(ast: &Ast, table: &SymbolTable, module: ModuleId, node: NodeId) -> Option<String> {
    match ast.kind(node) {
        // Bare literals and variables are not worth sharing.
        NodeKind::Binary { op, lhs, rhs } => {
            let a = operand_hash(ast, table, module, *lhs)?;
            let b = operand_hash(ast, table, module, *rhs)?;
            Some(format!("{op}({a},{b})"))
        }
        NodeKind::Unary { op, operand } => {
            let a = operand_hash(ast, table, module, *operand)?;
            Some(format!("{op}({a})"))
        }
        _ => None,
    }
}

fn operand_hash(ast: &Ast, table: &SymbolTable, module: ModuleId, node: NodeId) -> Option<String> {
    match ast.kind(node) {
        NodeKind::Literal(LiteralValue::Number(n)) => Some(format!("#{n}")),
        NodeKind::Literal(LiteralValue::Bool(b)) => Some(format!("#{}", u32::from(*b))),
        NodeKind::Identifier(_) => table
            .resolution(NodeRef::new(module, node))
            .map(|s| format!("s{}", s.0)),
        _ => pure_hash(ast, table, module, node),
    }
}

fn kill_mentions(available: &mut BTreeMap<String, NodeId>, symbol: SymbolId) {
    let token = format!("s{}", symbol.0);
    available.retain(|hash, _| {
        // Token boundary: s1 must not match s12.
        let bytes = hash.as_bytes();
        let mut from = 0;
        let mut mentions = false;
        while let Some(at) = hash[from..].find(&token) {
            let start = from + at;
            let end = start + token.len();
            if end >= bytes.len() || !bytes[end].is_ascii_digit() {
                mentions = true;
                break;
            }
            from = start + 1;
        }
        !mentions
    });
}
