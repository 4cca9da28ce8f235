//! Constant propagation: forward analysis on the flat constant lattice.
//!
//! Per variable: absent (unreached) < `Const(v)` < `Varying`. Literal
//! assignments produce constants; arithmetic over constants folds; any
//! varying input poisons the result. Guards that evaluate to a constant
//! mark their branch statically taken or not taken.

use std::collections::BTreeMap;

use blend65_ast::{AnalysisConfig, Ast, BinaryOp, LiteralValue, NodeId, NodeKind, UnaryOp};
use blend65_semantics::{ModuleId, NodeRef, SymbolId, SymbolTable};

use crate::cfg::{Cfg, CfgNodeId, CfgNodeKind};
use crate::dataflow::{solve, Direction};

/// Lattice value of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstLattice {
    /// Known value on every path seen so far.
    Const(u32),
    /// Proven to vary.
    Varying,
}

/// Per-variable environment; a missing key means "no path defined it yet".
pub type ConstEnv = BTreeMap<SymbolId, ConstLattice>;

/// Result of constant propagation over one function.
#[derive(Debug, Clone)]
pub struct ConstResult {
    /// Environment entering each node.
    pub env_in: Vec<ConstEnv>,
    /// Environment leaving each node.
    pub env_out: Vec<ConstEnv>,
    /// Guard nodes proven constant: `true` = always taken.
    pub branch_taken: BTreeMap<CfgNodeId, bool>,
    /// Definitions proven to write one constant value.
    pub constant_defs: BTreeMap<CfgNodeId, (SymbolId, u32)>,
    /// Fixed-point passes.
    pub iterations: usize,
    /// False when the cap was hit.
    pub converged: bool,
}

fn meet_env(a: &ConstEnv, b: &ConstEnv) -> ConstEnv {
    let mut out = a.clone();
    for (&symbol, &value) in b {
        out.entry(symbol)
            .and_modify(|existing| {
                if *existing != value {
                    *existing = ConstLattice::Varying;
                }
            })
            .or_insert(value);
    }
    out
}

/// Fold `node` under `env`, or `None` when not statically known.
pub fn eval_const(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    env: &ConstEnv,
    node: NodeId,
) -> Option<u32> {
    match ast.kind(node) {
        NodeKind::Literal(LiteralValue::Number(n)) => Some(*n),
        NodeKind::Literal(LiteralValue::Bool(b)) => Some(u32::from(*b)),
        NodeKind::Identifier(_) => {
            let symbol = table.resolution(NodeRef::new(module, node))?;
            match env.get(&symbol) {
                Some(ConstLattice::Const(v)) => Some(*v),
                _ => None,
            }
        }
        NodeKind::Binary { op, lhs, rhs } => {
            let a = eval_const(ast, table, module, env, *lhs)?;
            let b = eval_const(ast, table, module, env, *rhs)?;
            match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod => a.checked_rem(b),
                BinaryOp::BitAnd => Some(a & b),
                BinaryOp::BitOr => Some(a | b),
                BinaryOp::BitXor => Some(a ^ b),
                BinaryOp::Shl => a.checked_shl(b),
                BinaryOp::Shr => a.checked_shr(b),
                BinaryOp::Eq => Some(u32::from(a == b)),
                BinaryOp::Ne => Some(u32::from(a != b)),
                BinaryOp::Lt => Some(u32::from(a < b)),
                BinaryOp::Le => Some(u32::from(a <= b)),
                BinaryOp::Gt => Some(u32::from(a > b)),
                BinaryOp::Ge => Some(u32::from(a >= b)),
                BinaryOp::LogicalAnd => Some(u32::from(a != 0 && b != 0)),
                BinaryOp::LogicalOr => Some(u32::from(a != 0 || b != 0)),
            }
        }
        NodeKind::Unary { op, operand } => {
            let v = eval_const(ast, table, module, env, *operand)?;
            match op {
                UnaryOp::Neg => Some(v.wrapping_neg()),
                UnaryOp::Not => Some(u32::from(v == 0)),
                UnaryOp::BitNot => Some(!v),
                UnaryOp::AddressOf => None,
            }
        }
        _ => None,
    }
}

fn is_module_scope(table: &SymbolTable, module: ModuleId, symbol: SymbolId) -> bool {
    table
        .module_scope(table.module_path(module))
        .map(|scope| table.lookup_local(scope, &table.symbol(symbol).name) == Some(symbol))
        .unwrap_or(false)
}

/// Apply one node's attached statement to `env`.
fn transfer_node(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    attached: Option<NodeId>,
    env: &ConstEnv,
) -> ConstEnv {
    let mut out = env.clone();
    let Some(attached) = attached else {
        return out;
    };
    apply(ast, table, module, attached, &mut out);
    out
}

fn apply(ast: &Ast, table: &SymbolTable, module: ModuleId, node: NodeId, env: &mut ConstEnv) {
    match ast.kind(node) {
        NodeKind::VariableDecl { initializer, .. } => {
            let Some(symbol) = table.declaration_at(module, node) else {
                return;
            };
            if let Some(init) = initializer {
                let verdict = eval_const(ast, table, module, env, *init)
                    .map(ConstLattice::Const)
                    .unwrap_or(ConstLattice::Varying);
                env.insert(symbol, verdict);
            }
        }
        NodeKind::ExpressionStmt { expression } => {
            apply(ast, table, module, *expression, env)
        }
        NodeKind::Assignment { target, value } => {
            // Nested assignments first: `x = (y = 3)`.
            apply(ast, table, module, *value, env);
            if let NodeKind::Identifier(_) = ast.kind(*target) {
                if let Some(symbol) = table.resolution(NodeRef::new(module, *target)) {
                    let verdict = eval_const(ast, table, module, env, *value)
                        .map(ConstLattice::Const)
                        .unwrap_or(ConstLattice::Varying);
                    env.insert(symbol, verdict);
                }
            }
        }
        NodeKind::Call { .. } => {
            // A callee may write any module-scope variable.
            let globals: Vec<SymbolId> = env
                .keys()
                .copied()
                .filter(|&s| is_module_scope(table, module, s))
                .collect();
            for symbol in globals {
                env.insert(symbol, ConstLattice::Varying);
            }
        }
        _ => {}
    }
}

/// Run constant propagation over one function's CFG.
pub fn analyze(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    config: &AnalysisConfig,
) -> ConstResult {
    let solution = solve(
        cfg,
        Direction::Forward,
        ConstEnv::new(),
        meet_env,
        |node, env| transfer_node(ast, table, module, cfg.node(node).statement, env),
        config.max_dataflow_iterations,
    );

    let mut branch_taken = BTreeMap::new();
    let mut constant_defs = BTreeMap::new();
    for node in cfg.nodes() {
        let env = &solution.inputs[node.id.to_usize()];
        let Some(attached) = node.statement else {
            continue;
        };
        if matches!(node.kind, CfgNodeKind::Branch | CfgNodeKind::LoopHeader) {
            if let Some(v) = eval_const(ast, table, module, env, attached) {
                branch_taken.insert(node.id, v != 0);
            }
        }
        if let NodeKind::VariableDecl { initializer, .. } = ast.kind(attached) {
            if let (Some(symbol), Some(init)) =
                (table.declaration_at(module, attached), initializer)
            {
                if let Some(v) = eval_const(ast, table, module, env, *init) {
                    constant_defs.insert(node.id, (symbol, v));
                }
            }
        }
    }

    ConstResult {
        env_in: solution.inputs,
        env_out: solution.outputs,
        branch_taken,
        constant_defs,
        iterations: solution.iterations,
        converged: solution.converged,
    }
}
