//! Pass 2: annotation resolution and identifier binding.
//!
//! Fills `symbol.ty` for every annotated declaration, computes enum member
//! values, const-evaluates `@map` addresses, and binds every identifier
//! expression to its symbol. Expression *types* are pass 3's job.

use blend65_ast::{
    Ast, BinaryOp, Diagnostic, DiagnosticCode, DiagnosticSink, LiteralValue, NodeId, NodeKind,
    PassResult, TypeAnnotation,
};
use tracing::debug_span;

use crate::scope::{ScopeId, SymbolTable};
use crate::symbol::SymbolKind;
use crate::types::Type;
use crate::{ModuleId, NodeRef};

/// Pass 2 entry point.
pub struct TypeResolver;

impl TypeResolver {
    /// Resolve types and identifiers across all modules.
    pub fn run(asts: &[Ast], table: &mut SymbolTable) -> PassResult<()> {
        let span = debug_span!("type_resolver");
        let _guard = span.enter();

        let mut sink = DiagnosticSink::default();
        for (index, ast) in asts.iter().enumerate() {
            let module = ModuleId(index as u32);
            resolve_module_declarations(ast, table, module, &mut sink);
        }
        // Import types copy after every module's own declarations resolved.
        copy_import_types(table);
        for (index, ast) in asts.iter().enumerate() {
            let module = ModuleId(index as u32);
            bind_identifiers(ast, table, module, &mut sink);
        }
        tracing::debug!(diagnostics = sink.diagnostics().len(), "types resolved");
        PassResult::from_sink((), sink)
    }
}

/// Resolve a source annotation into a semantic type.
///
/// Unknown names are reported through `sink` and collapse to
/// [`Type::Unknown`] so one bad annotation does not cascade.
pub(crate) fn resolve_annotation(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    annotation: &TypeAnnotation,
    sink: &mut DiagnosticSink,
) -> Type {
    match try_resolve_annotation(ast, table, module, annotation, &mut Vec::new()) {
        Ok(ty) => ty,
        Err(name) => {
            sink.push(Diagnostic::error(
                DiagnosticCode::UnknownType,
                format!("unknown type `{name}`"),
            ));
            Type::Unknown
        }
    }
}

fn try_resolve_annotation(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    annotation: &TypeAnnotation,
    visiting: &mut Vec<String>,
) -> Result<Type, String> {
    match annotation {
        TypeAnnotation::Named(name) => match name.as_str() {
            "byte" => Ok(Type::Byte),
            "word" => Ok(Type::Word),
            "bool" => Ok(Type::Bool),
            "void" => Ok(Type::Void),
            "string" => Ok(Type::StringLit),
            other => {
                if visiting.iter().any(|n| n == other) {
                    // Alias cycle; surface as an unknown type.
                    return Err(other.to_string());
                }
                let Some(decl) = table.type_name(module, other) else {
                    return Err(other.to_string());
                };
                match ast.kind(decl.node) {
                    NodeKind::EnumDecl { name, members } => {
                        Ok(enum_type(ast, name, members))
                    }
                    NodeKind::TypeDecl { annotation, .. } => {
                        visiting.push(other.to_string());
                        let resolved =
                            try_resolve_annotation(ast, table, module, annotation, visiting);
                        visiting.pop();
                        resolved
                    }
                    _ => Err(other.to_string()),
                }
            }
        },
        TypeAnnotation::Array { element, length } => {
            let element = try_resolve_annotation(ast, table, module, element, visiting)?;
            Ok(Type::array(element, *length))
        }
    }
}

fn enum_type(ast: &Ast, name: &str, members: &[(String, Option<NodeId>)]) -> Type {
    let mut values = std::collections::BTreeMap::new();
    let mut next = 0u16;
    for (member, value) in members {
        let v = value
            .as_ref()
            .and_then(|node| const_eval(ast, *node))
            .map(|v| v as u16)
            .unwrap_or(next);
        values.insert(member.clone(), v);
        next = v.wrapping_add(1);
    }
    Type::Enum {
        name: name.to_string(),
        members: values,
    }
}

/// Fold a compile-time numeric expression, or `None` if it is not constant.
pub fn const_eval(ast: &Ast, node: NodeId) -> Option<u32> {
    match ast.kind(node) {
        NodeKind::Literal(LiteralValue::Number(n)) => Some(*n),
        NodeKind::Literal(LiteralValue::Bool(b)) => Some(u32::from(*b)),
        NodeKind::Binary { op, lhs, rhs } => {
            let a = const_eval(ast, *lhs)?;
            let b = const_eval(ast, *rhs)?;
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
                _ => None,
            }
        }
        _ => None,
    }
}

fn resolve_module_declarations(
    ast: &Ast,
    table: &mut SymbolTable,
    module: ModuleId,
    sink: &mut DiagnosticSink,
) {
    let mut worklist: Vec<NodeId> = ast
        .iter()
        .filter(|node| {
            matches!(
                node.kind,
                NodeKind::FunctionDecl { .. }
                    | NodeKind::VariableDecl { .. }
                    | NodeKind::SimpleMapDecl { .. }
                    | NodeKind::RangeMapDecl { .. }
                    | NodeKind::SequentialStructMapDecl { .. }
                    | NodeKind::ExplicitStructMapDecl { .. }
            )
        })
        .map(|node| node.id)
        .collect();
    worklist.sort_unstable();

    // Enum members first: their types are referenced by name everywhere.
    let enums: Vec<NodeId> = ast
        .iter()
        .filter(|node| matches!(node.kind, NodeKind::EnumDecl { .. }))
        .map(|node| node.id)
        .collect();
    for node in enums {
        let NodeKind::EnumDecl { name, members } = ast.kind(node) else {
            continue;
        };
        let ty = enum_type(ast, name, members);
        let member_names: Vec<String> = members
            .iter()
            .map(|(member, _)| format!("{name}.{member}"))
            .collect();
        let Some(scope) = table.module_scope(table.module_path(module)) else {
            continue;
        };
        for qualified in member_names {
            if let Some(id) = table.lookup_local(scope, &qualified) {
                table.symbol_mut(id).ty = Some(ty.clone());
            }
        }
    }

    for node in worklist {
        let node_ref = NodeRef::new(module, node);
        let Some(symbol_id) = table.declaration(node_ref) else {
            continue;
        };
        match ast.kind(node) {
            NodeKind::FunctionDecl {
                parameters,
                return_annotation,
                ..
            } => {
                let mut param_types = Vec::with_capacity(parameters.len());
                for &param in parameters {
                    let NodeKind::Parameter { annotation, .. } = ast.kind(param) else {
                        continue;
                    };
                    let ty = resolve_annotation(ast, table, module, annotation, sink);
                    param_types.push(ty.clone());
                    if let Some(pid) = table.declaration(NodeRef::new(module, param)) {
                        table.symbol_mut(pid).ty = Some(ty);
                    }
                }
                let ret = return_annotation
                    .as_ref()
                    .map(|a| resolve_annotation(ast, table, module, a, sink))
                    .unwrap_or(Type::Void);
                table.symbol_mut(symbol_id).ty = Some(Type::function(param_types, ret));
            }
            NodeKind::VariableDecl { annotation, .. } => {
                if let Some(annotation) = annotation {
                    let ty = resolve_annotation(ast, table, module, annotation, sink);
                    table.symbol_mut(symbol_id).ty = Some(ty);
                }
                // Un-annotated declarations are inferred by the checker.
            }
            NodeKind::SimpleMapDecl {
                annotation,
                address,
                ..
            } => {
                let ty = resolve_annotation(ast, table, module, annotation, sink);
                table.symbol_mut(symbol_id).ty = Some(ty);
                resolve_map_address(ast, table, symbol_id, *address, sink);
            }
            NodeKind::RangeMapDecl {
                annotation,
                start,
                end,
                ..
            } => {
                let element = resolve_annotation(ast, table, module, annotation, sink);
                let (start, end) = (*start, *end);
                let start_value = const_eval(ast, start);
                let end_value = const_eval(ast, end);
                match (start_value, end_value) {
                    (Some(s), Some(e)) if e >= s && e <= u32::from(u16::MAX) => {
                        let bytes = e - s + 1;
                        let elem_size = element.size_in_bytes().max(1);
                        table.symbol_mut(symbol_id).ty =
                            Some(Type::array(element, Some(bytes / elem_size)));
                        table.symbol_mut(symbol_id).address = Some(s as u16);
                    }
                    _ => {
                        sink.push(
                            Diagnostic::error(
                                DiagnosticCode::InvalidMapAddress,
                                "`@map` range bounds must be numeric constants",
                            )
                            .at(ast.location(start).clone()),
                        );
                        table.symbol_mut(symbol_id).ty = Some(Type::array(element, None));
                    }
                }
            }
            NodeKind::SequentialStructMapDecl { address, .. }
            | NodeKind::ExplicitStructMapDecl { address, .. } => {
                // Field layout is the checker's concern; only the base
                // address resolves here.
                resolve_map_address(ast, table, symbol_id, *address, sink);
            }
            _ => {}
        }
    }
}

fn resolve_map_address(
    ast: &Ast,
    table: &mut SymbolTable,
    symbol_id: crate::symbol::SymbolId,
    address: NodeId,
    sink: &mut DiagnosticSink,
) {
    match const_eval(ast, address) {
        Some(value) if value <= u32::from(u16::MAX) => {
            table.symbol_mut(symbol_id).address = Some(value as u16);
        }
        _ => {
            sink.push(
                Diagnostic::error(
                    DiagnosticCode::InvalidMapAddress,
                    "`@map` address must be a numeric constant in 0..=$FFFF",
                )
                .at(ast.location(address).clone()),
            );
        }
    }
}

fn copy_import_types(table: &mut SymbolTable) {
    let copies: Vec<(crate::symbol::SymbolId, Option<Type>)> = table
        .symbols()
        .filter(|(_, s)| s.kind == SymbolKind::Import)
        .filter_map(|(id, s)| {
            s.imported_from
                .map(|target| (id, table.symbol(target).ty.clone()))
        })
        .collect();
    for (id, ty) in copies {
        table.symbol_mut(id).ty = ty;
    }
}

fn bind_identifiers(ast: &Ast, table: &mut SymbolTable, module: ModuleId, sink: &mut DiagnosticSink) {
    let Some(root) = ast.root() else {
        return;
    };
    let Some(scope) = table.module_scope(table.module_path(module)) else {
        return;
    };
    visit(ast, table, module, root, scope, sink);
}

fn visit(
    ast: &Ast,
    table: &mut SymbolTable,
    module: ModuleId,
    node: NodeId,
    scope: ScopeId,
    sink: &mut DiagnosticSink,
) {
    let node_ref = NodeRef::new(module, node);
    let scope = table.scope_of_node(node_ref).unwrap_or(scope);
    match ast.kind(node) {
        NodeKind::Identifier(name) => match table.lookup(scope, name) {
            Some(symbol) => table.record_resolution(node_ref, symbol),
            None => {
                sink.push(
                    Diagnostic::error(
                        DiagnosticCode::UnresolvedIdentifier,
                        format!("cannot find `{name}` in this scope"),
                    )
                    .at(ast.location(node).clone()),
                );
            }
        },
        NodeKind::Member { base, member } => {
            // `Enum.member` names a value of the enum's type; the base is a
            // type name, not a value, so it does not resolve on its own.
            if let NodeKind::Identifier(base_name) = ast.kind(*base) {
                if table.type_name(module, base_name).is_some() {
                    let qualified = format!("{base_name}.{member}");
                    if let Some(symbol) = table.lookup(scope, &qualified) {
                        table.record_resolution(node_ref, symbol);
                    }
                    return;
                }
            }
            visit(ast, table, module, *base, scope, sink);
        }
        NodeKind::Call { callee, .. } => {
            // `sizeof` takes a type name, not a value; its argument does not
            // resolve through the value namespace.
            let skip_args = matches!(ast.kind(*callee), NodeKind::Identifier(name) if name == "sizeof");
            if skip_args {
                visit(ast, table, module, *callee, scope, sink);
            } else {
                for child in ast.children(node) {
                    visit(ast, table, module, child, scope, sink);
                }
            }
        }
        NodeKind::Error => {}
        _ => {
            for child in ast.children(node) {
                visit(ast, table, module, child, scope, sink);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol_table::SymbolTableBuilder;
    use blend65_ast::AstBuilder;

    fn resolve(asts: Vec<Ast>) -> (SymbolTable, PassResult<()>) {
        let built = SymbolTableBuilder::build(&asts);
        assert!(built.success, "{:?}", built.diagnostics);
        let mut table = built.data;
        let result = TypeResolver::run(&asts, &mut table);
        (table, result)
    }

    #[test]
    fn annotated_variable_gets_its_type() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let ten = b.number(10);
        let decl = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(ten));
        let body = b.block(vec![decl]);
        let f = b.function("f", vec![], None, Some(body));
        b.program(Some(module), vec![f]);
        let (table, result) = resolve(vec![b.finish()]);
        assert!(result.success);
        let x = table.symbol_named("x").unwrap();
        assert_eq!(table.symbol(x).ty, Some(Type::Byte));
    }

    #[test]
    fn function_signature_resolves() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let p = b.parameter("n", TypeAnnotation::named("word"));
        let body = b.block(vec![]);
        let f = b.function("f", vec![p], Some(TypeAnnotation::named("byte")), Some(body));
        b.program(Some(module), vec![f]);
        let (table, result) = resolve(vec![b.finish()]);
        assert!(result.success);
        let f = table.symbol_named("f").unwrap();
        assert_eq!(
            table.symbol(f).ty,
            Some(Type::function(vec![Type::Word], Type::Byte))
        );
        let n = table.symbol_named("n").unwrap();
        assert_eq!(table.symbol(n).ty, Some(Type::Word));
    }

    #[test]
    fn unresolved_identifier_is_an_error() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let ghost = b.ident("ghost");
        let stmt = b.expr_stmt(ghost);
        let body = b.block(vec![stmt]);
        let f = b.function("f", vec![], None, Some(body));
        b.program(Some(module), vec![f]);
        let (_, result) = resolve(vec![b.finish()]);
        assert!(!result.success);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::UnresolvedIdentifier));
    }

    #[test]
    fn map_address_must_be_numeric() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let addr = b.string("not-a-number");
        let map = b.simple_map("border", TypeAnnotation::named("byte"), addr);
        b.program(Some(module), vec![map]);
        let (_, result) = resolve(vec![b.finish()]);
        assert!(!result.success);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::InvalidMapAddress));
    }

    #[test]
    fn map_address_folds_constant_arithmetic() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let base = b.number(0xD000);
        let offset = b.number(0x20);
        let addr = b.binary(BinaryOp::Add, base, offset);
        let map = b.simple_map("border", TypeAnnotation::named("byte"), addr);
        b.program(Some(module), vec![map]);
        let (table, result) = resolve(vec![b.finish()]);
        assert!(result.success, "{:?}", result.diagnostics);
        let sym = table.symbol_named("border").unwrap();
        assert_eq!(table.symbol(sym).address, Some(0xD020));
    }

    #[test]
    fn shadowed_identifier_binds_to_innermost() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let one = b.number(1);
        let outer = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(one));
        let two = b.number(2);
        let inner = b.let_decl("x", Some(TypeAnnotation::named("word")), Some(two));
        let use_x = b.ident("x");
        let use_stmt = b.expr_stmt(use_x);
        let inner_block = b.block(vec![inner, use_stmt]);
        let body = b.block(vec![outer, inner_block]);
        let f = b.function("f", vec![], None, Some(body));
        b.program(Some(module), vec![f]);
        let asts = vec![b.finish()];
        let (table, result) = resolve(asts);
        assert!(result.success, "{:?}", result.diagnostics);
        let resolved = table
            .resolution(NodeRef::new(ModuleId(0), use_x))
            .expect("identifier bound");
        assert_eq!(table.symbol(resolved).ty, Some(Type::Word));
    }
}
