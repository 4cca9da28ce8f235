//! Liveness: backward may-analysis over variables.
//!
//! `OUT[n] = ⋃ IN[succ]`, `IN[n] = USE[n] ∪ (OUT[n] \ DEF[n])`. Also
//! derives dead definitions, live-at-entry, live intervals over a reverse
//! post-order linearization, and the interference pairs the allocator
//! wants.

use std::collections::{BTreeMap, BTreeSet};

use blend65_ast::{AnalysisConfig, Ast};
use blend65_semantics::{ModuleId, SymbolId, SymbolTable};
use itertools::Itertools;
use tracing::trace;

use crate::cfg::{Cfg, CfgNodeId};
use crate::dataflow::{solve, use_def_sets, Direction, UseDef};
use crate::graph::FlowGraph;

/// Everything liveness learned about one function.
#[derive(Debug, Clone)]
pub struct LivenessResult {
    /// USE/DEF per node.
    pub use_def: Vec<UseDef>,
    /// Live-in set per node, indexed by [`CfgNodeId`].
    pub live_in: Vec<BTreeSet<SymbolId>>,
    /// Live-out set per node.
    pub live_out: Vec<BTreeSet<SymbolId>>,
    /// Variables live when the function starts: parameters, globals, and
    /// any use before definition.
    pub live_at_entry: BTreeSet<SymbolId>,
    /// Definitions whose value is never read.
    pub dead_definitions: Vec<(CfgNodeId, SymbolId)>,
    /// First/last linearized position each variable is live at.
    pub intervals: BTreeMap<SymbolId, (usize, usize)>,
    /// Pairs of variables whose intervals overlap.
    pub interferences: Vec<(SymbolId, SymbolId)>,
    /// Fixed-point passes.
    pub iterations: usize,
    /// False when the cap was hit.
    pub converged: bool,
}

/// Run liveness over one function's CFG.
pub fn analyze(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    config: &AnalysisConfig,
) -> LivenessResult {
    let use_def = use_def_sets(cfg, ast, table, module);

    let solution = solve(
        cfg,
        Direction::Backward,
        BTreeSet::new(),
        |a: &BTreeSet<SymbolId>, b| a.union(b).copied().collect(),
        |node, out| {
            let ud = &use_def[node.to_usize()];
            let mut live: BTreeSet<SymbolId> = out.difference(&ud.defs).copied().collect();
            live.extend(ud.uses.iter().copied());
            live
        },
        config.max_dataflow_iterations,
    );
    trace!(iterations = solution.iterations, "liveness fixed point");

    let live_in = solution.inputs;
    let live_out = solution.outputs;

    let mut dead_definitions = Vec::new();
    for node in cfg.nodes() {
        let ud = &use_def[node.id.to_usize()];
        if !node.reachable {
            continue;
        }
        for &def in &ud.defs {
            if !live_out[node.id.to_usize()].contains(&def) {
                dead_definitions.push((node.id, def));
            }
        }
    }

    // Linearize in reverse post-order and scan for interval endpoints.
    let rpo: Vec<usize> = {
        let mut visited = vec![false; cfg.node_count()];
        let mut post = Vec::new();
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
        post
    };
    let mut intervals: BTreeMap<SymbolId, (usize, usize)> = BTreeMap::new();
    for (position, &node) in rpo.iter().enumerate() {
        for &symbol in live_in[node].iter().chain(&live_out[node]) {
            intervals
                .entry(symbol)
                .and_modify(|(_, last)| *last = position)
                .or_insert((position, position));
        }
    }

    let interferences = intervals
        .iter()
        .tuple_combinations::<(_, _)>()
        .filter(|((_, (a_start, a_end)), (_, (b_start, b_end)))| {
            a_start <= b_end && b_start <= a_end
        })
        .map(|((&a, _), (&b, _))| (a, b))
        .collect();

    LivenessResult {
        live_at_entry: live_in[cfg.entry().to_usize()].clone(),
        use_def,
        live_in,
        live_out,
        dead_definitions,
        intervals,
        interferences,
        iterations: solution.iterations,
        converged: solution.converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgBuilder;
    use blend65_ast::{AstBuilder, BinaryOp, NodeId, TypeAnnotation};
    use blend65_semantics::{SymbolTableBuilder, TypeResolver};

    fn run(
        make: impl FnOnce(&mut AstBuilder) -> Vec<NodeId>,
    ) -> (Ast, SymbolTable, Cfg, LivenessResult) {
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
        let ast = asts.into_iter().next().unwrap();
        let cfg = CfgBuilder::build(&ast, ModuleId(0), f).unwrap();
        let result = analyze(&cfg, &ast, &table, ModuleId(0), &AnalysisConfig::default());
        (ast, table, cfg, result)
    }

    #[test]
    fn copy_keeps_the_source_live() {
        // S1: let x = 10; let y = x;
        let mut x_decl = None;
        let mut y_decl = None;
        let (_, table, cfg, result) = run(|b| {
            let ten = b.number(10);
            let x = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(ten));
            let xr = b.ident("x");
            let y = b.let_decl("y", Some(TypeAnnotation::named("byte")), Some(xr));
            x_decl = Some(x);
            y_decl = Some(y);
            vec![x, y]
        });
        let x = table.symbol_named("x").unwrap();
        let x_node = cfg.node_of_statement(x_decl.unwrap()).unwrap();
        let y_node = cfg.node_of_statement(y_decl.unwrap()).unwrap();
        assert!(result.live_in[y_node.to_usize()].contains(&x));
        assert!(result.live_out[x_node.to_usize()].contains(&x));
        // y itself is dead (never read), x is not.
        assert!(result.dead_definitions.iter().all(|(_, s)| *s != x));
    }

    #[test]
    fn unused_definition_is_dead() {
        // S2: let x = 10; and nothing else.
        let (_, table, _, result) = run(|b| {
            let ten = b.number(10);
            let x = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(ten));
            vec![x]
        });
        let x = table.symbol_named("x").unwrap();
        assert!(result
            .dead_definitions
            .iter()
            .any(|(_, symbol)| *symbol == x));
        assert!(result.live_out.iter().all(|out| !out.contains(&x)));
    }

    #[test]
    fn loop_converges_quickly() {
        let (_, table, cfg, result) = run(|b| {
            let zero = b.number(0);
            let i = b.let_decl("i", Some(TypeAnnotation::named("byte")), Some(zero));
            let iref = b.ident("i");
            let ten = b.number(10);
            let cond = b.binary(BinaryOp::Lt, iref, ten);
            let iref2 = b.ident("i");
            let one = b.number(1);
            let inc = b.binary(BinaryOp::Add, iref2, one);
            let assign = b.assign_stmt("i", inc);
            let body = b.block(vec![assign]);
            let w = b.while_stmt(cond, body);
            vec![i, w]
        });
        assert!(result.converged);
        let nodes = cfg.node_count();
        assert!(
            result.iterations < nodes * nodes,
            "liveness took {} passes over {nodes} nodes",
            result.iterations
        );
        // The counter stays live around the loop.
        let i = table.symbol_named("i").unwrap();
        let header = cfg
            .nodes()
            .iter()
            .find(|n| n.kind == crate::cfg::CfgNodeKind::LoopHeader)
            .unwrap();
        assert!(result.live_in[header.id.to_usize()].contains(&i));
    }

    #[test]
    fn live_at_entry_flags_use_before_definition() {
        let (_, table, _, result) = run(|b| {
            let ghost_use = b.ident("x");
            let y = b.let_decl("y", Some(TypeAnnotation::named("byte")), Some(ghost_use));
            let ten = b.number(10);
            let x = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(ten));
            vec![y, x]
        });
        let x = table.symbol_named("x").unwrap();
        assert!(result.live_at_entry.contains(&x));
    }

    #[test]
    fn overlapping_intervals_interfere() {
        let (_, table, _, result) = run(|b| {
            let one = b.number(1);
            let a = b.let_decl("a", Some(TypeAnnotation::named("byte")), Some(one));
            let two = b.number(2);
            let bb = b.let_decl("b", Some(TypeAnnotation::named("byte")), Some(two));
            let ar = b.ident("a");
            let br = b.ident("b");
            let sum = b.binary(BinaryOp::Add, ar, br);
            let c = b.let_decl("c", Some(TypeAnnotation::named("byte")), Some(sum));
            vec![a, bb, c]
        });
        let a = table.symbol_named("a").unwrap();
        let b = table.symbol_named("b").unwrap();
        assert!(result
            .interferences
            .iter()
            .any(|&(x, y)| (x, y) == (a, b) || (x, y) == (b, a)));
    }
}
