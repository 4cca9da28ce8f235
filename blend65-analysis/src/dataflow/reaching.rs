//! Reaching definitions: forward may-analysis with def–use chains.

use std::collections::{BTreeMap, BTreeSet};

use blend65_ast::{AnalysisConfig, Ast};
use blend65_semantics::{ModuleId, SymbolId, SymbolTable};

use crate::cfg::{Cfg, CfgNodeId};
use crate::dataflow::{solve, use_def_sets, Direction, UseDef};

/// One definition site, identified by a dense id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefSite {
    /// Dense id; index into the site table.
    pub id: usize,
    /// Node performing the definition.
    pub node: CfgNodeId,
    /// Defined variable.
    pub symbol: SymbolId,
}

/// Fixed point plus derived chains.
#[derive(Debug, Clone)]
pub struct ReachingResult {
    /// All definition sites in node order.
    pub sites: Vec<DefSite>,
    /// Definition ids reaching each node's entry.
    pub reach_in: Vec<BTreeSet<usize>>,
    /// Definition ids leaving each node.
    pub reach_out: Vec<BTreeSet<usize>>,
    /// USE/DEF per node, shared with the solver.
    pub use_def: Vec<UseDef>,
    /// def → nodes that use it.
    pub du_chains: BTreeMap<usize, BTreeSet<CfgNodeId>>,
    /// (use node, variable) → defs that may reach it.
    pub ud_chains: BTreeMap<(CfgNodeId, SymbolId), BTreeSet<usize>>,
    /// Fixed-point passes.
    pub iterations: usize,
    /// False when the cap was hit.
    pub converged: bool,
}

impl ReachingResult {
    /// Defs of `symbol` reaching the entry of `node`.
    pub fn defs_reaching(&self, node: CfgNodeId, symbol: SymbolId) -> Vec<&DefSite> {
        self.reach_in[node.to_usize()]
            .iter()
            .map(|&id| &self.sites[id])
            .filter(|site| site.symbol == symbol)
            .collect()
    }
}

/// Run reaching definitions over one function's CFG.
pub fn analyze(
    cfg: &Cfg,
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    config: &AnalysisConfig,
) -> ReachingResult {
    let use_def = use_def_sets(cfg, ast, table, module);

    // Number definition sites.
    let mut sites = Vec::new();
    let mut gen_sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); cfg.node_count()];
    let mut sites_of_symbol: BTreeMap<SymbolId, BTreeSet<usize>> = BTreeMap::new();
    for node in cfg.nodes() {
        for &symbol in &use_def[node.id.to_usize()].defs {
            let id = sites.len();
            sites.push(DefSite {
                id,
                node: node.id,
                symbol,
            });
            gen_sets[node.id.to_usize()].insert(id);
            sites_of_symbol.entry(symbol).or_default().insert(id);
        }
    }
    let kill_sets: Vec<BTreeSet<usize>> = cfg
        .nodes()
        .iter()
        .map(|node| {
            let mut kill = BTreeSet::new();
            for &symbol in &use_def[node.id.to_usize()].defs {
                kill.extend(sites_of_symbol[&symbol].iter().copied());
            }
            kill = kill
                .difference(&gen_sets[node.id.to_usize()])
                .copied()
                .collect();
            kill
        })
        .collect();

    let solution = solve(
        cfg,
        Direction::Forward,
        BTreeSet::new(),
        |a: &BTreeSet<usize>, b| a.union(b).copied().collect(),
        |node, input| {
            let i = node.to_usize();
            let mut out: BTreeSet<usize> = input.difference(&kill_sets[i]).copied().collect();
            out.extend(gen_sets[i].iter().copied());
            out
        },
        config.max_dataflow_iterations,
    );

    // Chains fall out of the fixed point.
    let mut du_chains: BTreeMap<usize, BTreeSet<CfgNodeId>> = BTreeMap::new();
    let mut ud_chains: BTreeMap<(CfgNodeId, SymbolId), BTreeSet<usize>> = BTreeMap::new();
    for node in cfg.nodes() {
        for &symbol in &use_def[node.id.to_usize()].uses {
            let reaching: BTreeSet<usize> = solution.inputs[node.id.to_usize()]
                .iter()
                .copied()
                .filter(|&id| sites[id].symbol == symbol)
                .collect();
            for &def in &reaching {
                du_chains.entry(def).or_default().insert(node.id);
            }
            ud_chains.insert((node.id, symbol), reaching);
        }
    }

    ReachingResult {
        sites,
        reach_in: solution.inputs,
        reach_out: solution.outputs,
        use_def,
        du_chains,
        ud_chains,
        iterations: solution.iterations,
        converged: solution.converged,
    }
}
