//! The fixed-order analysis pipeline.
//!
//! Symbols → types → checking → per-function CFGs → data-flow and loop
//! analyses → IL → zero-page validation → SSA → target hints. Mandatory
//! passes short-circuit on error; the independent analyses keep running
//! and only contribute warnings and facts. `StopAfter` cuts the run short
//! for IDE-style partial queries.

use blend65_ast::{
    AnalysisConfig, Ast, Diagnostic, DiagnosticCode, NodeKind, PassResult, Severity,
};
use blend65_ir::builder::IlBuilder;
use blend65_ir::Module;
use blend65_semantics::{
    ModuleId, ModuleTypes, NodeRef, SymbolTable, SymbolTableBuilder, Type, TypeChecker,
    TypeResolver,
};
use blend65_target::{
    validate_placements, Architecture, HintAnalyzer, TargetConfig, TargetError, ZpCandidate,
};
use tracing::debug_span;

use crate::cfg::{reachability_diagnostics, Cfg, CfgBuilder};
use crate::dataflow::constants::{self, ConstResult};
use crate::dataflow::cse::{self, CseResult};
use crate::dataflow::gvn::{self, GvnResult};
use crate::dataflow::liveness::{self, LivenessResult};
use crate::dataflow::reaching::{self, ReachingResult};
use crate::dataflow::usage::{self, UsageResult};
use crate::facts::{ConstFact, FactTable};
use crate::loops::{self, LoopResult};
use crate::ssa::{self, SsaStats, SsaVerification};

/// Cut the pipeline short after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopAfter {
    /// Scope and symbol construction.
    SymbolTable,
    /// Type resolution and checking.
    Types,
    /// Control-flow graphs and reachability.
    Cfg,
    /// Data-flow and loop analyses.
    Analyses,
    /// IL construction.
    Il,
    /// SSA construction and verification.
    Ssa,
}

/// Everything one function's analyses produced.
#[derive(Debug)]
pub struct FunctionAnalysis {
    /// Function name.
    pub name: String,
    /// Owning module.
    pub module: ModuleId,
    /// The control-flow graph.
    pub cfg: Cfg,
    /// Liveness fixed point.
    pub liveness: LivenessResult,
    /// Reaching definitions.
    pub reaching: ReachingResult,
    /// Constant propagation.
    pub constants: ConstResult,
    /// Value numbering.
    pub gvn: GvnResult,
    /// Local CSE candidates.
    pub cse: CseResult,
    /// Natural loops and induction variables.
    pub loops: LoopResult,
}

/// Artifacts of a whole pipeline run.
#[derive(Debug)]
pub struct PipelineOutput {
    /// The symbol table, counters filled.
    pub symbol_table: SymbolTable,
    /// Checker artifacts per module.
    pub module_types: Vec<ModuleTypes>,
    /// Per-function analyses, in declaration order.
    pub functions: Vec<FunctionAnalysis>,
    /// Usage/purity/escape results.
    pub usage: Option<UsageResult>,
    /// Node-keyed analysis facts.
    pub facts: FactTable,
    /// IL modules (in SSA form unless stopped earlier).
    pub il: Vec<Module>,
    /// SSA statistics and verification per function.
    pub ssa: Vec<(String, SsaStats, SsaVerification)>,
    /// Ranked zero-page candidates.
    pub zp_candidates: Vec<ZpCandidate>,
    /// Every diagnostic, in pass order.
    pub diagnostics: Vec<Diagnostic>,
    /// True iff no diagnostic has severity `Error`.
    pub success: bool,
}

/// The pipeline driver.
#[derive(Debug)]
pub struct Pipeline {
    /// Shared analysis limits.
    pub config: AnalysisConfig,
    /// Target machine description.
    pub target: TargetConfig,
    /// Optional early stop.
    pub stop_after: Option<StopAfter>,
}

impl Pipeline {
    /// Pipeline for `target` with default limits.
    pub fn new(target: TargetConfig) -> Self {
        Self {
            config: AnalysisConfig::default(),
            target,
            stop_after: None,
        }
    }

    /// Pipeline for a named architecture; only the C64 has a backend.
    pub fn for_architecture(architecture: Architecture) -> Result<Self, TargetError> {
        TargetConfig::for_architecture(architecture).map(Self::new)
    }

    /// Stop after `stage`.
    pub fn stop_after(mut self, stage: StopAfter) -> Self {
        self.stop_after = Some(stage);
        self
    }

    fn stops_at(&self, stage: StopAfter) -> bool {
        self.stop_after.map(|s| s <= stage).unwrap_or(false)
    }

    /// Run the whole pipeline over `asts`.
    pub fn run(&self, asts: &[Ast]) -> PipelineOutput {
        let span = debug_span!("pipeline", target = %self.target.architecture);
        let _guard = span.enter();

        let mut diagnostics = Vec::new();
        let output = |symbol_table, module_types, functions, usage, facts, il, ssa, zp, diagnostics: Vec<Diagnostic>| {
            let success = !diagnostics.iter().any(Diagnostic::is_error);
            PipelineOutput {
                symbol_table,
                module_types,
                functions,
                usage,
                facts,
                il,
                ssa,
                zp_candidates: zp,
                diagnostics,
                success,
            }
        };

        // Pass 1: scopes and symbols (mandatory).
        let PassResult {
            data: mut symbol_table,
            diagnostics: d,
            success,
        } = SymbolTableBuilder::build(asts);
        diagnostics.extend(d);
        if !success || self.stops_at(StopAfter::SymbolTable) {
            return output(
                symbol_table,
                Vec::new(),
                Vec::new(),
                None,
                FactTable::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                diagnostics,
            );
        }

        // Passes 2–3: types (mandatory).
        let resolved = TypeResolver::run(asts, &mut symbol_table);
        diagnostics.extend(resolved.diagnostics);
        let checked = TypeChecker::run(asts, &mut symbol_table);
        let module_types = checked.data;
        diagnostics.extend(checked.diagnostics);
        if !resolved.success || !checked.success || self.stops_at(StopAfter::Types) {
            return output(
                symbol_table,
                module_types,
                Vec::new(),
                None,
                FactTable::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                diagnostics,
            );
        }

        // Pass 5: CFGs (mandatory) with reachability and return checks.
        let mut facts = FactTable::new();
        let mut functions = Vec::new();
        for (index, ast) in asts.iter().enumerate() {
            let module = ModuleId(index as u32);
            for node in ast.iter() {
                let NodeKind::FunctionDecl { name, body, .. } = &node.kind else {
                    continue;
                };
                if body.is_none() {
                    // Stubs have no body and no CFG.
                    continue;
                }
                let Some(cfg) = CfgBuilder::build(ast, module, node.id) else {
                    continue;
                };
                diagnostics.extend(reachability_diagnostics(&cfg, ast));
                let returns_value = symbol_table
                    .declaration_at(module, node.id)
                    .and_then(|id| symbol_table.symbol(id).ty.clone())
                    .map(|ty| matches!(ty, Type::Function { ret, .. } if *ret != Type::Void))
                    .unwrap_or(false);
                if returns_value && cfg.falls_off_the_end(ast) {
                    diagnostics.push(
                        Diagnostic::warning(
                            DiagnosticCode::MissingReturn,
                            format!("`{name}` does not return a value on every path"),
                        )
                        .at(node.location.clone()),
                    );
                }
                let liveness =
                    liveness::analyze(&cfg, ast, &symbol_table, module, &self.config);
                let reaching =
                    reaching::analyze(&cfg, ast, &symbol_table, module, &self.config);
                let constants =
                    constants::analyze(&cfg, ast, &symbol_table, module, &self.config);
                functions.push(FunctionAnalysis {
                    name: name.clone(),
                    module,
                    cfg,
                    liveness,
                    reaching,
                    constants,
                    gvn: GvnResult::default(),
                    cse: CseResult::default(),
                    loops: LoopResult::default(),
                });
            }
        }
        if self.stops_at(StopAfter::Cfg) {
            return output(
                symbol_table,
                module_types,
                functions,
                None,
                facts,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                diagnostics,
            );
        }

        // Pass 6: independent analyses. Failures here never block the IL.
        for analysis in &mut functions {
            let ast = &asts[analysis.module.to_usize()];
            let module = analysis.module;
            let function_node = analysis.cfg.function.node;

            if !analysis.liveness.converged || !analysis.reaching.converged {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::IterationCapExceeded,
                    format!(
                        "data-flow iteration cap hit in `{}`; results are partial",
                        analysis.name
                    ),
                ));
            }
            for (node, symbol) in &analysis.liveness.dead_definitions {
                let Some(stmt) = analysis.cfg.node(*node).statement else {
                    continue;
                };
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticCode::DeadDefinition,
                        format!(
                            "value assigned to `{}` is never read",
                            symbol_table.symbol(*symbol).name
                        ),
                    )
                    .at(ast.location(stmt).clone()),
                );
            }
            for node in analysis.cfg.nodes() {
                if let Some(stmt) = node.statement {
                    let entry = facts.entry(NodeRef::new(module, stmt));
                    entry.live_in =
                        Some(analysis.liveness.live_in[node.id.to_usize()].clone());
                    entry.live_out =
                        Some(analysis.liveness.live_out[node.id.to_usize()].clone());
                }
            }
            for (&node, &taken) in &analysis.constants.branch_taken {
                if let Some(stmt) = analysis.cfg.node(node).statement {
                    facts.entry(NodeRef::new(module, stmt)).branch_taken = Some(taken);
                }
            }
            for (&node, &(_, value)) in &analysis.constants.constant_defs {
                if let Some(stmt) = analysis.cfg.node(node).statement {
                    facts.entry(NodeRef::new(module, stmt)).constant =
                        Some(ConstFact::Known(value));
                }
            }

            analysis.gvn = gvn::analyze(ast, &symbol_table, module, function_node);
            for (&node, vn) in analysis.gvn.value_numbers.iter() {
                facts.entry(NodeRef::new(module, node)).value_number = Some(*vn);
            }
            for (&node, holder) in analysis.gvn.redundant.iter() {
                facts.entry(NodeRef::new(module, node)).redundant_with = Some(holder.clone());
                diagnostics.push(
                    Diagnostic::info(
                        DiagnosticCode::GvnRedundancy,
                        format!("expression recomputes the value already in `{holder}`"),
                    )
                    .at(ast.location(node).clone()),
                );
            }

            analysis.cse = cse::analyze(&analysis.cfg, ast, &symbol_table, module, &mut facts);
            for (&node, _) in analysis.cse.candidates.iter() {
                diagnostics.push(
                    Diagnostic::info(
                        DiagnosticCode::CseOpportunity,
                        "subexpression is already available in this block",
                    )
                    .at(ast.location(node).clone()),
                );
            }

            analysis.loops = loops::analyze(
                &analysis.cfg,
                ast,
                &symbol_table,
                module,
                &analysis.reaching,
                &mut facts,
            );
            for l in &analysis.loops.loops {
                for &hoist in &l.hoistable {
                    diagnostics.push(
                        Diagnostic::info(
                            DiagnosticCode::HoistCandidate,
                            "loop-invariant expression could move to the pre-header",
                        )
                        .at(ast.location(hoist).clone()),
                    );
                }
            }
        }

        let PassResult {
            data: usage_value,
            diagnostics: usage_diags,
            ..
        } = usage::analyze(asts, &mut symbol_table);
        diagnostics.extend(usage_diags);
        let usage_data = Some(usage_value);
        if self.stops_at(StopAfter::Analyses) {
            return output(
                symbol_table,
                module_types,
                functions,
                usage_data,
                facts,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                diagnostics,
            );
        }

        // Pass 7: IL (mandatory).
        let il_result = IlBuilder::build(asts, &symbol_table, &module_types);
        let mut il = il_result.data;
        diagnostics.extend(il_result.diagnostics);
        if !il_result.success || self.stops_at(StopAfter::Il) {
            return output(
                symbol_table,
                module_types,
                functions,
                usage_data,
                facts,
                il,
                Vec::new(),
                Vec::new(),
                diagnostics,
            );
        }
        annotate_il_inductions(&mut il, &functions);
        diagnostics.extend(validate_placements(&il, &self.target));

        // Pass 8: SSA.
        let mut ssa_results = Vec::new();
        for module in &mut il {
            for function in module.functions.values_mut() {
                let stats = ssa::construct(function);
                let verification = ssa::verify(function);
                for violation in &verification.violations {
                    diagnostics.push(Diagnostic::error(
                        violation.code,
                        format!("{}: {}", function.name, violation.message),
                    ));
                }
                ssa_results.push((function.name.clone(), stats, verification));
            }
        }
        if self.stops_at(StopAfter::Ssa) {
            return output(
                symbol_table,
                module_types,
                functions,
                usage_data,
                facts,
                il,
                ssa_results,
                Vec::new(),
                diagnostics,
            );
        }

        // Pass 9: target hints.
        let hints = HintAnalyzer::annotate(&mut il, &self.target);
        diagnostics.extend(hints.diagnostics);

        output(
            symbol_table,
            module_types,
            functions,
            usage_data,
            facts,
            il,
            ssa_results,
            hints.data,
            diagnostics,
        )
    }
}

impl PipelineOutput {
    /// Diagnostics of a given severity.
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }

    /// Analysis record for a function by name.
    pub fn function(&self, name: &str) -> Option<&FunctionAnalysis> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Copy loop-analysis induction records onto the IL instructions whose
/// destinations model the induction variables.
fn annotate_il_inductions(il: &mut [Module], functions: &[FunctionAnalysis]) {
    for analysis in functions {
        let Some(module) = il.get_mut(analysis.module.to_usize()) else {
            continue;
        };
        let Some(function) = module.functions.get_mut(&analysis.name) else {
            continue;
        };
        let records: Vec<_> = analysis
            .loops
            .loops
            .iter()
            .flat_map(|l| l.inductions.iter().cloned())
            .collect();
        if records.is_empty() {
            continue;
        }
        let register_names: Vec<Option<String>> = function
            .registers
            .iter()
            .map(|r| r.name.clone())
            .collect();
        for block in &mut function.blocks {
            for instruction in &mut block.instructions {
                let Some(dest) = instruction.dest else {
                    continue;
                };
                let Some(Some(name)) = register_names.get(dest.to_usize()) else {
                    continue;
                };
                if let Some(record) = records.iter().find(|r| &r.variable == name) {
                    let in_loop = instruction.meta.loop_depth.unwrap_or(0) > 0;
                    if in_loop && instruction.meta.induction.is_none() {
                        instruction.meta.induction = Some(record.clone());
                    }
                }
            }
        }
    }
}
