//! Natural loops and induction variables.
//!
//! Back edges come from the dominator tree (`t → h` with `h` dominating
//! `t`); the natural loop is the header plus everything that reaches the
//! back edge without crossing the header. On top of the loop bodies:
//! basic induction variables (`i := i ± c`), derived ones
//! (`j := s·i + o`), loop-invariant expressions, and constant trip counts
//! for the unroller.

use std::collections::{BTreeMap, BTreeSet};

use blend65_ast::{Ast, BinaryOp, LiteralValue, NodeId, NodeKind};
use blend65_ir::InductionRecord;
use blend65_semantics::{ModuleId, NodeRef, SymbolId, SymbolTable};
use tracing::trace;

use crate::cfg::{Cfg, CfgNodeId, CfgNodeKind};
use crate::dataflow::reaching::ReachingResult;
use crate::facts::FactTable;
use crate::graph::Dominators;

/// One natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// Header node; every iteration passes through it.
    pub header: CfgNodeId,
    /// Nodes owned by the loop, header included.
    pub nodes: BTreeSet<CfgNodeId>,
    /// Nesting depth; outermost is 1.
    pub depth: u32,
    /// Induction variables, basic first.
    pub inductions: Vec<InductionRecord>,
    /// Constant iteration count, when the bounds are literal.
    pub trip_count: Option<u32>,
    /// Invariant expression nodes.
    pub invariants: Vec<NodeId>,
    /// Pure invariants worth hoisting.
    pub hoistable: Vec<NodeId>,
}

/// All loops of one function.
#[derive(Debug, Default, Clone)]
pub struct LoopResult {
    /// Loops, outermost first.
    pub loops: Vec<Loop>,
    /// Loop nesting depth per CFG node.
    pub node_depths: Vec<u32>,
}

/// Run loop analysis over one function.
pub fn analyze(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    reaching: &ReachingResult,
    facts: &mut FactTable,
) -> LoopResult {
    let dominators = Dominators::compute(cfg);

    // Back edges, grouped by header.
    let mut loop_nodes: BTreeMap<CfgNodeId, BTreeSet<CfgNodeId>> = BTreeMap::new();
    for node in cfg.nodes() {
        for &succ in &node.successors {
            if dominators.dominates(succ.to_usize(), node.id.to_usize()) {
                let body = natural_loop(cfg, node.id, succ);
                loop_nodes.entry(succ).or_default().extend(body);
            }
        }
    }
    trace!(count = loop_nodes.len(), "natural loops found");

    let mut node_depths = vec![0u32; cfg.node_count()];
    for nodes in loop_nodes.values() {
        for node in nodes {
            node_depths[node.to_usize()] += 1;
        }
    }

    let mut loops = Vec::new();
    for (header, nodes) in &loop_nodes {
        let depth = loop_nodes
            .values()
            .filter(|other| other.contains(header))
            .count() as u32;
        let inductions = find_inductions(cfg, ast, table, module, reaching, *header, nodes);
        let trip_count = trip_count(cfg, ast, table, module, *header, &inductions);
        let (invariants, hoistable) =
            find_invariants(cfg, ast, table, module, reaching, nodes);
        loops.push(Loop {
            header: *header,
            nodes: nodes.clone(),
            depth,
            inductions,
            trip_count,
            invariants,
            hoistable,
        });
    }
    loops.sort_by_key(|l| (l.depth, l.header));

    // Annotate the side table.
    for node in cfg.nodes() {
        if let Some(stmt) = node.statement {
            facts.entry(NodeRef::new(module, stmt)).loop_depth =
                Some(node_depths[node.id.to_usize()]);
        }
    }
    for l in &loops {
        for record in &l.inductions {
            if let Some(def_node) = l.nodes.iter().find_map(|&n| {
                let stmt = cfg.node(n).statement?;
                defined_symbol(ast, table, module, stmt)
                    .filter(|&(s, _)| table.symbol(s).name == record.variable)
                    .map(|_| stmt)
            }) {
                facts.entry(NodeRef::new(module, def_node)).induction = Some(record.clone());
            }
        }
        for &invariant in &l.invariants {
            facts.entry(NodeRef::new(module, invariant)).loop_invariant = Some(true);
        }
        for &hoist in &l.hoistable {
            facts.entry(NodeRef::new(module, hoist)).hoist_candidate = Some(true);
        }
    }

    LoopResult { loops, node_depths }
}

/// Header plus all nodes that reach the back-edge source without crossing
/// the header.
fn natural_loop(cfg: &Cfg, tail: CfgNodeId, header: CfgNodeId) -> BTreeSet<CfgNodeId> {
    let mut nodes = BTreeSet::from([header, tail]);
    let mut stack = vec![tail];
    while let Some(node) = stack.pop() {
        if node == header {
            continue;
        }
        for &pred in &cfg.node(node).predecessors {
            if nodes.insert(pred) {
                stack.push(pred);
            }
        }
    }
    nodes
}

/// `(symbol, value expression)` defined by a statement, when it defines
/// exactly one.
fn defined_symbol(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    stmt: NodeId,
) -> Option<(SymbolId, NodeId)> {
    match ast.kind(stmt) {
        NodeKind::VariableDecl {
            initializer: Some(init),
            ..
        } => table
            .declaration_at(module, stmt)
            .map(|symbol| (symbol, *init)),
        NodeKind::ExpressionStmt { expression } => {
            defined_symbol(ast, table, module, *expression)
        }
        NodeKind::Assignment { target, value } => {
            if let NodeKind::Identifier(_) = ast.kind(*target) {
                table
                    .resolution(NodeRef::new(module, *target))
                    .map(|symbol| (symbol, *value))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn literal_u32(ast: &Ast, node: NodeId) -> Option<u32> {
    match ast.kind(node) {
        NodeKind::Literal(LiteralValue::Number(n)) => Some(*n),
        NodeKind::Literal(LiteralValue::Bool(b)) => Some(u32::from(*b)),
        _ => None,
    }
}

fn is_symbol(ast: &Ast, table: &SymbolTable, module: ModuleId, node: NodeId, symbol: SymbolId) -> bool {
    matches!(ast.kind(node), NodeKind::Identifier(_))
        && table.resolution(NodeRef::new(module, node)) == Some(symbol)
}

fn find_inductions(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    reaching: &ReachingResult,
    header: CfgNodeId,
    nodes: &BTreeSet<CfgNodeId>,
) -> Vec<InductionRecord> {
    // Count definitions of each variable inside the loop.
    let mut defs_in_loop: BTreeMap<SymbolId, Vec<(CfgNodeId, NodeId)>> = BTreeMap::new();
    for &node in nodes {
        let Some(stmt) = cfg.node(node).statement else {
            continue;
        };
        if let Some((symbol, value)) = defined_symbol(ast, table, module, stmt) {
            defs_in_loop.entry(symbol).or_default().push((node, value));
        }
    }

    let mut records = Vec::new();

    // Basic IVs: single update of the form i := i ± c or i := c + i.
    let mut biv_symbols: BTreeMap<SymbolId, InductionRecord> = BTreeMap::new();
    for (&symbol, defs) in &defs_in_loop {
        let [(_, value)] = defs.as_slice() else {
            continue;
        };
        let Some(stride) = update_stride(ast, table, module, *value, symbol) else {
            continue;
        };
        let initial = initial_value(cfg, ast, table, module, reaching, header, nodes, symbol);
        let record = InductionRecord {
            variable: table.symbol(symbol).name.clone(),
            base: None,
            stride,
            offset: 0,
            initial,
        };
        biv_symbols.insert(symbol, record.clone());
        records.push(record);
    }

    // Derived IVs: single definition j := s·i + o over a basic IV.
    for (&symbol, defs) in &defs_in_loop {
        if biv_symbols.contains_key(&symbol) {
            continue;
        }
        let [(_, value)] = defs.as_slice() else {
            continue;
        };
        if let Some((base, stride, offset)) =
            derived_form(ast, table, module, *value, &biv_symbols)
        {
            records.push(InductionRecord {
                variable: table.symbol(symbol).name.clone(),
                base: Some(table.symbol(base).name.clone()),
                stride,
                offset,
                initial: None,
            });
        }
    }

    records
}

/// Stride of `value` as an update of `symbol`, or `None` when it is not a
/// basic induction update.
fn update_stride(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    value: NodeId,
    symbol: SymbolId,
) -> Option<i32> {
    let NodeKind::Binary { op, lhs, rhs } = ast.kind(value) else {
        return None;
    };
    let (lhs, rhs) = (*lhs, *rhs);
    match op {
        BinaryOp::Add => {
            if is_symbol(ast, table, module, lhs, symbol) {
                literal_u32(ast, rhs).map(|c| c as i32)
            } else if is_symbol(ast, table, module, rhs, symbol) {
                // c + i
                literal_u32(ast, lhs).map(|c| c as i32)
            } else {
                None
            }
        }
        BinaryOp::Sub => {
            // Only i - c counts down; c - i alternates and is rejected.
            if is_symbol(ast, table, module, lhs, symbol) {
                literal_u32(ast, rhs).map(|c| -(c as i32))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Match `value` against `s·i + o`, `i + o`, `s·i`, or `i` for any basic
/// IV `i`, normalizing commutativity.
fn derived_form(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    value: NodeId,
    bivs: &BTreeMap<SymbolId, InductionRecord>,
) -> Option<(SymbolId, i32, i32)> {
    // Plain copy: j := i.
    for &biv in bivs.keys() {
        if is_symbol(ast, table, module, value, biv) {
            return Some((biv, 1, 0));
        }
    }
    let NodeKind::Binary { op, lhs, rhs } = ast.kind(value) else {
        return None;
    };
    let (lhs, rhs) = (*lhs, *rhs);
    match op {
        BinaryOp::Mul => scaled_biv(ast, table, module, lhs, rhs, bivs)
            .map(|(base, stride)| (base, stride, 0)),
        BinaryOp::Add => {
            // One side is the scaled IV, the other the literal offset.
            for (term, other) in [(lhs, rhs), (rhs, lhs)] {
                let Some(offset) = literal_u32(ast, other) else {
                    continue;
                };
                for &biv in bivs.keys() {
                    if is_symbol(ast, table, module, term, biv) {
                        return Some((biv, 1, offset as i32));
                    }
                }
                if let NodeKind::Binary {
                    op: BinaryOp::Mul,
                    lhs: m_lhs,
                    rhs: m_rhs,
                } = ast.kind(term)
                {
                    if let Some((base, stride)) =
                        scaled_biv(ast, table, module, *m_lhs, *m_rhs, bivs)
                    {
                        return Some((base, stride, offset as i32));
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Match `a · b` where one side is a basic IV and the other a literal.
fn scaled_biv(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    a: NodeId,
    b: NodeId,
    bivs: &BTreeMap<SymbolId, InductionRecord>,
) -> Option<(SymbolId, i32)> {
    for (iv, lit) in [(a, b), (b, a)] {
        let Some(stride) = literal_u32(ast, lit) else {
            continue;
        };
        for &biv in bivs.keys() {
            if is_symbol(ast, table, module, iv, biv) {
                return Some((biv, stride as i32));
            }
        }
    }
    None
}

/// Literal initial value: the one definition reaching the header from
/// outside the loop.
fn initial_value(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    reaching: &ReachingResult,
    header: CfgNodeId,
    loop_nodes: &BTreeSet<CfgNodeId>,
    symbol: SymbolId,
) -> Option<u32> {
    let defs = reaching.defs_reaching(header, symbol);
    // Pre-header definitions only; the back-edge update also reaches here.
    let outside: Vec<_> = defs
        .iter()
        .filter(|site| !loop_nodes.contains(&site.node))
        .collect();
    let [site] = outside.as_slice() else {
        return None;
    };
    let stmt = cfg.node(site.node).statement?;
    let (def_symbol, value) = defined_symbol(ast, table, module, stmt)?;
    (def_symbol == symbol)
        .then(|| literal_u32(ast, value))
        .flatten()
}

/// Constant trip count from a literal-bounded basic IV.
fn trip_count(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    header: CfgNodeId,
    inductions: &[InductionRecord],
) -> Option<u32> {
    let guard = cfg
        .node(header)
        .statement
        .filter(|_| cfg.node(header).kind == CfgNodeKind::LoopHeader)?;
    let NodeKind::Binary { op, lhs, rhs } = ast.kind(guard) else {
        return None;
    };
    let (lhs, rhs) = (*lhs, *rhs);

    let biv_of = |node: NodeId| -> Option<&InductionRecord> {
        let symbol = table.resolution(NodeRef::new(module, node))?;
        let name = &table.symbol(symbol).name;
        inductions
            .iter()
            .find(|r| r.is_basic() && r.variable == *name)
    };

    // Normalize to (iv, bound, op-with-iv-on-the-left).
    let (record, bound, op) = if let (Some(record), Some(bound)) = (biv_of(lhs), literal_u32(ast, rhs)) {
        (record, bound, *op)
    } else if let (Some(record), Some(bound)) = (biv_of(rhs), literal_u32(ast, lhs)) {
        let flipped = match op {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => *other,
        };
        (record, bound, flipped)
    } else {
        return None;
    };

    let initial = record.initial? as i64;
    let bound = i64::from(bound);
    let stride = i64::from(record.stride);
    let span = match op {
        BinaryOp::Lt if stride > 0 && bound > initial => bound - initial,
        BinaryOp::Le if stride > 0 && bound >= initial => bound - initial + 1,
        BinaryOp::Gt if stride < 0 && initial > bound => initial - bound,
        BinaryOp::Ge if stride < 0 && initial >= bound => initial - bound + 1,
        _ => return None,
    };
    let step = stride.abs();
    Some(((span + step - 1) / step) as u32)
}

/// Invariant expressions: every variable read has all reaching defs
/// outside the loop; pure shapes only.
fn find_invariants(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    reaching: &ReachingResult,
    nodes: &BTreeSet<CfgNodeId>,
) -> (Vec<NodeId>, Vec<NodeId>) {
    let mut invariants = Vec::new();
    let mut hoistable = Vec::new();
    for &node in nodes {
        let Some(stmt) = cfg.node(node).statement else {
            continue;
        };
        // Look at the value expressions of the statement, not the statement
        // itself: `x = a * b` hoists `a * b`, not the store.
        let exprs: Vec<NodeId> = match ast.kind(stmt) {
            NodeKind::VariableDecl {
                initializer: Some(init),
                ..
            } => vec![*init],
            NodeKind::ExpressionStmt { expression } => match ast.kind(*expression) {
                NodeKind::Assignment { value, .. } => vec![*value],
                _ => vec![*expression],
            },
            kind if kind.is_expression() => vec![stmt],
            _ => Vec::new(),
        };
        for expr in exprs {
            if !matches!(ast.kind(expr), NodeKind::Binary { .. } | NodeKind::Unary { .. }) {
                continue;
            }
            if is_invariant(ast, table, module, reaching, node, nodes, expr) {
                invariants.push(expr);
                hoistable.push(expr);
            }
        }
    }
    (invariants, hoistable)
}

fn is_invariant(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    reaching: &ReachingResult,
    at: CfgNodeId,
    loop_nodes: &BTreeSet<CfgNodeId>,
    expr: NodeId,
) -> bool {
    match ast.kind(expr) {
        NodeKind::Literal(_) => true,
        NodeKind::Identifier(_) => {
            let Some(symbol) = table.resolution(NodeRef::new(module, expr)) else {
                return false;
            };
            reaching
                .ud_chains
                .get(&(at, symbol))
                .map(|defs| {
                    defs.iter()
                        .all(|&id| !loop_nodes.contains(&reaching.sites[id].node))
                })
                .unwrap_or(true)
        }
        NodeKind::Binary { lhs, rhs, .. } => {
            is_invariant(ast, table, module, reaching, at, loop_nodes, *lhs)
                && is_invariant(ast, table, module, reaching, at, loop_nodes, *rhs)
        }
        NodeKind::Unary { operand, .. } => {
            is_invariant(ast, table, module, reaching, at, loop_nodes, *operand)
        }
        // Calls, members, and indexing stay put.
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgBuilder;
    use crate::dataflow::reaching;
    use blend65_ast::{AnalysisConfig, AstBuilder, TypeAnnotation};
    use blend65_semantics::{SymbolTableBuilder, TypeResolver};
    use test_case::test_case;

    fn run(
        make: impl FnOnce(&mut AstBuilder) -> Vec<NodeId>,
    ) -> LoopResult {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let stmts = make(&mut b);
        let body = b.block(stmts);
        let f = b.function("f", vec![], None, Some(body));
        b.program(Some(module), vec![f]);
        let asts = vec![b.finish()];
        let built = SymbolTableBuilder::build(&asts);
        let mut table = built.data;
        let _ = TypeResolver::run(&asts, &mut table);
        let cfg = CfgBuilder::build(&asts[0], ModuleId(0), f).unwrap();
        let reaching =
            reaching::analyze(&cfg, &asts[0], &table, ModuleId(0), &AnalysisConfig::default());
        let mut facts = FactTable::new();
        analyze(&cfg, &asts[0], &table, ModuleId(0), &reaching, &mut facts)
    }

    /// `let i = <init>; while i < <bound> { ...extra; i = i + <step>; }`
    fn counting_loop(
        b: &mut AstBuilder,
        init: u32,
        bound: u32,
        step: u32,
        extra: Vec<NodeId>,
    ) -> Vec<NodeId> {
        let init_lit = b.number(init);
        let decl = b.let_decl("i", Some(TypeAnnotation::named("byte")), Some(init_lit));
        let iref = b.ident("i");
        let bound_lit = b.number(bound);
        let cond = b.binary(BinaryOp::Lt, iref, bound_lit);
        let iref2 = b.ident("i");
        let step_lit = b.number(step);
        let inc = b.binary(BinaryOp::Add, iref2, step_lit);
        let update = b.assign_stmt("i", inc);
        let mut body_stmts = extra;
        body_stmts.push(update);
        let body = b.block(body_stmts);
        let w = b.while_stmt(cond, body);
        vec![decl, w]
    }

    #[test]
    fn simple_counter_is_a_biv_with_trip_count() {
        // S4: exactly one loop; i is a BIV, stride 1, initial 0, 10 trips.
        let result = run(|b| counting_loop(b, 0, 10, 1, vec![]));
        assert_eq!(result.loops.len(), 1);
        let l = &result.loops[0];
        assert_eq!(l.depth, 1);
        let biv = l
            .inductions
            .iter()
            .find(|r| r.is_basic())
            .expect("basic IV");
        assert_eq!(biv.variable, "i");
        assert_eq!(biv.stride, 1);
        assert_eq!(biv.initial, Some(0));
        assert_eq!(l.trip_count, Some(10));
    }

    #[test_case(1 ; "by one")]
    #[test_case(2 ; "by two")]
    #[test_case(5 ; "by five")]
    fn strides_follow_the_update(step: u32) {
        let result = run(|b| counting_loop(b, 0, 20, step, vec![]));
        let biv = result.loops[0]
            .inductions
            .iter()
            .find(|r| r.is_basic())
            .unwrap();
        assert_eq!(biv.stride, step as i32);
    }

    #[test]
    fn decrement_loop_has_negative_stride() {
        let result = run(|b| {
            let ten = b.number(10);
            let decl = b.let_decl("i", Some(TypeAnnotation::named("byte")), Some(ten));
            let iref = b.ident("i");
            let zero = b.number(0);
            let cond = b.binary(BinaryOp::Gt, iref, zero);
            let iref2 = b.ident("i");
            let one = b.number(1);
            let dec = b.binary(BinaryOp::Sub, iref2, one);
            let update = b.assign_stmt("i", dec);
            let body = b.block(vec![update]);
            let w = b.while_stmt(cond, body);
            vec![decl, w]
        });
        let biv = result.loops[0]
            .inductions
            .iter()
            .find(|r| r.is_basic())
            .unwrap();
        assert_eq!(biv.stride, -1);
        assert_eq!(biv.initial, Some(10));
        assert_eq!(result.loops[0].trip_count, Some(10));
    }

    #[test]
    fn commutative_update_counts() {
        // i = 1 + i
        let result = run(|b| {
            let zero = b.number(0);
            let decl = b.let_decl("i", Some(TypeAnnotation::named("byte")), Some(zero));
            let iref = b.ident("i");
            let ten = b.number(10);
            let cond = b.binary(BinaryOp::Lt, iref, ten);
            let one = b.number(1);
            let iref2 = b.ident("i");
            let inc = b.binary(BinaryOp::Add, one, iref2);
            let update = b.assign_stmt("i", inc);
            let body = b.block(vec![update]);
            let w = b.while_stmt(cond, body);
            vec![decl, w]
        });
        let biv = result.loops[0]
            .inductions
            .iter()
            .find(|r| r.is_basic())
            .unwrap();
        assert_eq!(biv.stride, 1);
    }

    #[test]
    fn derived_iv_with_scale_and_offset() {
        // S5: j = i * 2 + 10 and the commuted 10 + i * 2.
        for commuted in [false, true] {
            let result = run(|b| {
                let iref = b.ident("i");
                let two = b.number(2);
                let scaled = b.binary(BinaryOp::Mul, iref, two);
                let ten_off = b.number(10);
                let sum = if commuted {
                    b.binary(BinaryOp::Add, ten_off, scaled)
                } else {
                    b.binary(BinaryOp::Add, scaled, ten_off)
                };
                let j = b.let_decl("j", Some(TypeAnnotation::named("byte")), Some(sum));
                counting_loop(b, 0, 10, 1, vec![j])
            });
            let div = result.loops[0]
                .inductions
                .iter()
                .find(|r| !r.is_basic())
                .unwrap_or_else(|| panic!("derived IV missing (commuted = {commuted})"));
            assert_eq!(div.variable, "j");
            assert_eq!(div.base.as_deref(), Some("i"));
            assert_eq!(div.stride, 2);
            assert_eq!(div.offset, 10);
        }
    }

    #[test]
    fn sprite_address_pattern() {
        // j = i * 64: stride 64, offset 0.
        let result = run(|b| {
            let iref = b.ident("i");
            let sixty_four = b.number(64);
            let scaled = b.binary(BinaryOp::Mul, iref, sixty_four);
            let j = b.let_decl("j", Some(TypeAnnotation::named("word")), Some(scaled));
            counting_loop(b, 0, 8, 1, vec![j])
        });
        let div = result.loops[0]
            .inductions
            .iter()
            .find(|r| !r.is_basic())
            .expect("derived IV");
        assert_eq!(div.stride, 64);
        assert_eq!(div.offset, 0);
    }

    #[test]
    fn variable_stride_is_rejected() {
        let result = run(|b| {
            let one = b.number(1);
            let k = b.let_decl("k", Some(TypeAnnotation::named("byte")), Some(one));
            let iref = b.ident("i");
            let kref = b.ident("k");
            let sum = b.binary(BinaryOp::Add, iref, kref);
            let update = b.assign_stmt("i", sum);
            let mut stmts = counting_loop(b, 0, 10, 1, vec![]);
            // Replace the body with a variable-stride update by prepending
            // a second loop whose update is i = i + k.
            let cond_i = b.ident("i");
            let ten = b.number(10);
            let cond = b.binary(BinaryOp::Lt, cond_i, ten);
            let body = b.block(vec![update]);
            let w = b.while_stmt(cond, body);
            stmts.insert(0, k);
            stmts.push(w);
            stmts
        });
        // The second loop's i = i + k must not be a BIV.
        let bad = result
            .loops
            .iter()
            .flat_map(|l| &l.inductions)
            .filter(|r| r.is_basic() && r.variable == "i")
            .count();
        assert_eq!(bad, 1, "only the constant-stride loop yields a BIV");
    }

    #[test]
    fn accumulator_is_not_a_biv() {
        // x = x + i accumulates; not an induction variable.
        let result = run(|b| {
            let zero = b.number(0);
            let x = b.let_decl("x", Some(TypeAnnotation::named("word")), Some(zero));
            let xr = b.ident("x");
            let iref = b.ident("i");
            let sum = b.binary(BinaryOp::Add, xr, iref);
            let acc = b.assign_stmt("x", sum);
            let mut stmts = counting_loop(b, 0, 10, 1, vec![acc]);
            stmts.insert(0, x);
            stmts
        });
        assert!(result.loops[0]
            .inductions
            .iter()
            .all(|r| r.variable != "x"));
    }

    #[test]
    fn nested_loops_have_depths() {
        let result = run(|b| {
            // Inner: while j < 5 { j = j + 1; }  nested in outer counter.
            let zero_j = b.number(0);
            let j_decl = b.let_decl("j", Some(TypeAnnotation::named("byte")), Some(zero_j));
            let jr = b.ident("j");
            let five = b.number(5);
            let inner_cond = b.binary(BinaryOp::Lt, jr, five);
            let jr2 = b.ident("j");
            let one = b.number(1);
            let j_inc = b.binary(BinaryOp::Add, jr2, one);
            let j_update = b.assign_stmt("j", j_inc);
            let inner_body = b.block(vec![j_update]);
            let inner = b.while_stmt(inner_cond, inner_body);
            counting_loop(b, 0, 3, 1, vec![j_decl, inner])
        });
        assert_eq!(result.loops.len(), 2);
        let depths: Vec<u32> = result.loops.iter().map(|l| l.depth).collect();
        assert!(depths.contains(&1) && depths.contains(&2));
    }

    #[test]
    fn pure_invariant_is_hoistable() {
        let result = run(|b| {
            let two = b.number(2);
            let a = b.let_decl("a", Some(TypeAnnotation::named("byte")), Some(two));
            let ar = b.ident("a");
            let three = b.number(3);
            let product = b.binary(BinaryOp::Mul, ar, three);
            let t = b.let_decl("t", Some(TypeAnnotation::named("byte")), Some(product));
            let mut stmts = counting_loop(b, 0, 10, 1, vec![t]);
            stmts.insert(0, a);
            stmts
        });
        let l = &result.loops[0];
        assert!(!l.hoistable.is_empty(), "a * 3 does not depend on the loop");
    }
}
