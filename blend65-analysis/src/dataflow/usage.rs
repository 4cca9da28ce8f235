//! Usage counting, unused-symbol reporting, purity, escape, and alias
//! classification.
//!
//! Straightforward walkers over the annotated AST. Each sub-analysis is
//! independent; a failure in one does not stop the others.

use std::collections::BTreeMap;

use blend65_ast::{
    Ast, Diagnostic, DiagnosticCode, DiagnosticSink, NodeId, NodeKind, PassResult, StorageClass,
    UnaryOp,
};
use blend65_ir::{AliasRegion, Purity};
use blend65_semantics::{ModuleId, NodeRef, SymbolId, SymbolKind, SymbolTable};
use tracing::debug_span;

/// Artifacts of the usage analyses.
#[derive(Debug, Default)]
pub struct UsageResult {
    /// Purity classification per function symbol.
    pub purity: BTreeMap<SymbolId, Purity>,
    /// Locals whose address escapes the frame.
    pub escapes: Vec<SymbolId>,
    /// Memory region each symbol's accesses belong to.
    pub alias: BTreeMap<SymbolId, AliasRegion>,
}

/// Run every usage walker; counters land on the symbols themselves.
pub fn analyze(asts: &[Ast], table: &mut SymbolTable) -> PassResult<UsageResult> {
    let span = debug_span!("usage_analysis");
    let _guard = span.enter();

    let mut sink = DiagnosticSink::default();
    let mut result = UsageResult::default();

    for (index, ast) in asts.iter().enumerate() {
        let module = ModuleId(index as u32);
        if let Some(root) = ast.root() {
            count_node(ast, table, module, root, false);
        }
    }

    // Alias regions and escapes read the finished counters.
    let mut purity_inputs = Vec::new();
    for (id, symbol) in table.symbols() {
        let region = match symbol.storage {
            StorageClass::Map => AliasRegion::MappedHardware,
            _ => AliasRegion::Regular,
        };
        result.alias.insert(id, region);
        if symbol.address_taken {
            result.escapes.push(id);
        }
        if symbol.kind == SymbolKind::Function && symbol.decl.is_some() {
            purity_inputs.push(id);
        }
    }

    for function in &purity_inputs {
        let purity = classify_purity(asts, table, *function, &mut Vec::new());
        result.purity.insert(*function, purity);
        if purity == Purity::Pure {
            sink.push(Diagnostic::info(
                DiagnosticCode::PureFunction,
                format!("`{}` is pure", table.symbol(*function).name),
            ));
        }
    }

    unused_diagnostics(table, &mut sink);
    tracing::debug!(
        functions = result.purity.len(),
        escapes = result.escapes.len(),
        "usage analysis finished"
    );
    PassResult::from_sink(result, sink)
}

/// Walk counting reads/writes; `writing` is true under an assignment
/// target.
fn count_node(ast: &Ast, table: &mut SymbolTable, module: ModuleId, node: NodeId, writing: bool) {
    match ast.kind(node).clone() {
        NodeKind::Identifier(_) => {
            if let Some(symbol) = table.resolution(NodeRef::new(module, node)) {
                if writing {
                    table.symbol_mut(symbol).writes += 1;
                } else {
                    table.symbol_mut(symbol).reads += 1;
                }
            }
        }
        NodeKind::Assignment { target, value } => {
            count_node(ast, table, module, target, true);
            count_node(ast, table, module, value, false);
        }
        NodeKind::Unary {
            op: UnaryOp::AddressOf,
            operand,
        } => {
            if let Some(symbol) = table.resolution(NodeRef::new(module, operand)) {
                table.symbol_mut(symbol).address_taken = true;
                table.symbol_mut(symbol).reads += 1;
            }
        }
        NodeKind::VariableDecl { initializer, .. } => {
            if let Some(symbol) = table.declaration_at(module, node) {
                if initializer.is_some() {
                    table.symbol_mut(symbol).writes += 1;
                }
            }
            if let Some(init) = initializer {
                count_node(ast, table, module, init, false);
            }
        }
        NodeKind::Index { base, index } => {
            // Indexed writes still read the base address.
            count_node(ast, table, module, base, false);
            count_node(ast, table, module, index, false);
        }
        NodeKind::Member { base, .. } => {
            count_node(ast, table, module, base, false);
            // Enum member references resolve on the member node itself.
            if let Some(symbol) = table.resolution(NodeRef::new(module, node)) {
                table.symbol_mut(symbol).reads += 1;
            }
        }
        _ => {
            for child in ast.children(node) {
                count_node(ast, table, module, child, false);
            }
        }
    }
}

fn unused_diagnostics(table: &SymbolTable, sink: &mut DiagnosticSink) {
    for (_, symbol) in table.symbols() {
        if symbol.exported || symbol.decl.is_none() {
            continue;
        }
        match symbol.kind {
            SymbolKind::Variable | SymbolKind::Constant => {
                if symbol.reads == 0 && !symbol.address_taken {
                    sink.push(
                        Diagnostic::warning(
                            DiagnosticCode::UnusedSymbol,
                            format!("`{}` is never read", symbol.name),
                        )
                        .at(symbol.location.clone()),
                    );
                }
            }
            SymbolKind::Import => {
                if symbol.uses() == 0 {
                    sink.push(
                        Diagnostic::warning(
                            DiagnosticCode::UnusedImport,
                            format!("imported `{}` is never used", symbol.name),
                        )
                        .at(symbol.location.clone()),
                    );
                }
            }
            SymbolKind::Function => {
                if symbol.uses() == 0 && symbol.name != "main" {
                    sink.push(
                        Diagnostic::warning(
                            DiagnosticCode::UnusedFunction,
                            format!("`{}` is never called", symbol.name),
                        )
                        .at(symbol.location.clone()),
                    );
                }
            }
            // Parameters and enum members stay quiet; stubs and generated
            // members would drown the signal.
            SymbolKind::Parameter | SymbolKind::EnumMember => {}
        }
    }
}

/// Conservative purity of one function; cycles collapse to `Impure`.
fn classify_purity(
    asts: &[Ast],
    table: &SymbolTable,
    function: SymbolId,
    visiting: &mut Vec<SymbolId>,
) -> Purity {
    if visiting.contains(&function) {
        return Purity::Impure;
    }
    let Some(decl) = table.symbol(function).decl else {
        // Intrinsic purity comes from the intrinsic table.
        return match blend65_ir::intrinsic_def(&table.symbol(function).name) {
            Some(def) if def.is_pure() => Purity::Pure,
            Some(def) if def.flags.contains(blend65_ir::IntrinsicFlags::SIDE_EFFECTS) => {
                Purity::WritesMemory
            }
            Some(_) => Purity::ReadsMemory,
            None => Purity::Impure,
        };
    };
    let ast = &asts[decl.module.to_usize()];
    let NodeKind::FunctionDecl { body, .. } = ast.kind(decl.node) else {
        return Purity::Impure;
    };
    let Some(body) = body else {
        // Stubs link to unknown code.
        return Purity::Impure;
    };

    visiting.push(function);
    let mut level = Purity::Pure;
    walk_purity(asts, table, decl.module, ast, *body, &mut level, visiting);
    visiting.pop();
    level
}

fn raise(level: &mut Purity, to: Purity) {
    if to > *level {
        *level = to;
    }
}

fn walk_purity(
    asts: &[Ast],
    table: &SymbolTable,
    module: ModuleId,
    ast: &Ast,
    node: NodeId,
    level: &mut Purity,
    visiting: &mut Vec<SymbolId>,
) {
    match ast.kind(node) {
        NodeKind::Assignment { target, .. } => {
            if let Some(symbol) = table.resolution(NodeRef::new(module, *target)) {
                let s = table.symbol(symbol);
                if s.storage == StorageClass::Map {
                    raise(level, Purity::WritesMemory);
                } else if is_module_scope(table, module, symbol) {
                    raise(level, Purity::WritesMemory);
                }
            }
            if let NodeKind::Member { base, .. } = ast.kind(*target) {
                if let Some(symbol) = table.resolution(NodeRef::new(module, *base)) {
                    if table.symbol(symbol).storage == StorageClass::Map {
                        raise(level, Purity::WritesMemory);
                    }
                }
            }
        }
        NodeKind::Member { .. } => {
            // Reads of mapped hardware are observable.
            if let Some(symbol) = table.resolution(NodeRef::new(module, node)) {
                if table.symbol(symbol).storage == StorageClass::Map {
                    raise(level, Purity::ReadsMemory);
                }
            }
        }
        NodeKind::Identifier(_) => {
            if let Some(symbol) = table.resolution(NodeRef::new(module, node)) {
                if table.symbol(symbol).storage == StorageClass::Map {
                    raise(level, Purity::ReadsMemory);
                }
            }
        }
        NodeKind::Call { callee, .. } => {
            match table.resolution(NodeRef::new(module, *callee)) {
                Some(symbol) => {
                    let resolved = table.symbol(symbol).imported_from.unwrap_or(symbol);
                    let callee_purity = classify_purity(asts, table, resolved, visiting);
                    raise(level, callee_purity);
                }
                None => raise(level, Purity::Impure),
            }
        }
        _ => {}
    }
    for child in ast.children(node) {
        walk_purity(asts, table, module, ast, child, level, visiting);
    }
}

fn is_module_scope(table: &SymbolTable, module: ModuleId, symbol: SymbolId) -> bool {
    table
        .module_scope(table.module_path(module))
        .map(|scope| table.lookup_local(scope, &table.symbol(symbol).name) == Some(symbol))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blend65_ast::{AstBuilder, TypeAnnotation};
    use blend65_semantics::{SymbolTableBuilder, TypeResolver};

    fn run(build: impl FnOnce(&mut AstBuilder)) -> (SymbolTable, PassResult<UsageResult>) {
        let mut b = AstBuilder::new("main.b65");
        build(&mut b);
        let asts = vec![b.finish()];
        let built = SymbolTableBuilder::build(&asts);
        let mut table = built.data;
        let _ = TypeResolver::run(&asts, &mut table);
        let result = analyze(&asts, &mut table);
        (table, result)
    }

    #[test]
    fn read_and_write_counts_accumulate() {
        let (table, _) = run(|b| {
            let module = b.module(&["main"]);
            let zero = b.number(0);
            let x = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(zero));
            let xr = b.ident("x");
            let one = b.number(1);
            let sum = b.binary(blend65_ast::BinaryOp::Add, xr, one);
            let assign = b.assign_stmt("x", sum);
            let body = b.block(vec![x, assign]);
            let f = b.function("main", vec![], None, Some(body));
            b.program(Some(module), vec![f]);
        });
        let x = table.symbol_named("x").unwrap();
        assert_eq!(table.symbol(x).reads, 1);
        // Declaration init plus assignment.
        assert_eq!(table.symbol(x).writes, 2);
    }

    #[test]
    fn never_read_symbol_is_reported() {
        let (_, result) = run(|b| {
            let module = b.module(&["main"]);
            let zero = b.number(0);
            let x = b.let_decl("unused", Some(TypeAnnotation::named("byte")), Some(zero));
            let body = b.block(vec![x]);
            let f = b.function("main", vec![], None, Some(body));
            b.program(Some(module), vec![f]);
        });
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::UnusedSymbol));
    }

    #[test]
    fn pure_function_is_classified_and_hinted() {
        let (table, result) = run(|b| {
            let module = b.module(&["main"]);
            let p = b.parameter("n", TypeAnnotation::named("byte"));
            let nr = b.ident("n");
            let two = b.number(2);
            let dbl = b.binary(blend65_ast::BinaryOp::Mul, nr, two);
            let ret = b.return_stmt(Some(dbl));
            let body = b.block(vec![ret]);
            let f = b.function("double", vec![p], Some(TypeAnnotation::named("byte")), Some(body));
            b.program(Some(module), vec![f]);
        });
        let f = table.symbol_named("double").unwrap();
        assert_eq!(result.data.purity.get(&f), Some(&Purity::Pure));
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::PureFunction));
    }

    #[test]
    fn poke_makes_a_function_impure() {
        let (table, result) = run(|b| {
            let module = b.module(&["main"]);
            let poke = b.ident("poke");
            let addr = b.number(0xD020);
            let val = b.number(0);
            let call = b.call(poke, vec![addr, val]);
            let stmt = b.expr_stmt(call);
            let body = b.block(vec![stmt]);
            let f = b.function("flash", vec![], None, Some(body));
            b.program(Some(module), vec![f]);
        });
        let f = table.symbol_named("flash").unwrap();
        assert_eq!(result.data.purity.get(&f), Some(&Purity::WritesMemory));
    }

    #[test]
    fn address_taken_marks_escape() {
        let (table, result) = run(|b| {
            let module = b.module(&["main"]);
            let zero = b.number(0);
            let x = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(zero));
            let xr = b.ident("x");
            let addr = b.unary(UnaryOp::AddressOf, xr);
            let p = b.let_decl("p", Some(TypeAnnotation::named("word")), Some(addr));
            let pr = b.ident("p");
            let use_p = b.expr_stmt(pr);
            let body = b.block(vec![x, p, use_p]);
            let f = b.function("main", vec![], None, Some(body));
            b.program(Some(module), vec![f]);
        });
        let x = table.symbol_named("x").unwrap();
        assert!(table.symbol(x).address_taken);
        assert!(result.data.escapes.contains(&x));
    }
}
