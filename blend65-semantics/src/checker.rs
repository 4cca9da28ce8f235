//! Pass 3: type checking.
//!
//! One walker over each module computes a type for every expression node,
//! infers un-annotated variable declarations, lays out `@map` structs, and
//! checks statements against their context (loop nesting, enclosing
//! function return type). Every checked node gets an entry in
//! [`ModuleTypes::expr_types`]; failed nodes get [`Type::Unknown`] so
//! checking continues.

use std::collections::BTreeMap;

use blend65_ast::{
    Ast, Diagnostic, DiagnosticCode, DiagnosticSink, FieldOffset, LiteralValue, NodeId, NodeKind,
    PassResult, StorageClass,
};
use hashbrown::HashMap;
use tracing::debug_span;

use crate::resolver::resolve_annotation;
use crate::scope::SymbolTable;
use crate::symbol::{SymbolId, SymbolKind};
use crate::types::{binary_result_type, unary_result_type, Compatibility, Type, TypeTable};
use crate::{ModuleId, NodeRef};

/// Resolved callee of a `Call` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// A user-defined function.
    Function(SymbolId),
    /// A built-in intrinsic, by name.
    Intrinsic(String),
}

/// Placement of one `@map` struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFieldLayout {
    /// Byte offset from the struct base.
    pub offset: u16,
    /// Size in bytes.
    pub size: u16,
    /// Field type.
    pub ty: Type,
}

/// Computed layout of a `@map` struct.
#[derive(Debug, Clone, PartialEq)]
pub struct MapLayout {
    /// Base hardware address.
    pub base: u16,
    /// Total footprint in bytes.
    pub size: u16,
    /// Field name → placement.
    pub fields: BTreeMap<String, MapFieldLayout>,
}

/// What a `Member` expression refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberRef {
    /// An enum member and its constant value.
    EnumValue {
        /// Member value.
        value: u16,
        /// The enum type.
        ty: Type,
    },
    /// A field of a `@map` struct.
    MapField {
        /// The mapped symbol.
        symbol: SymbolId,
        /// Field offset from the base address.
        offset: u16,
        /// Field size in bytes.
        size: u16,
        /// Field type.
        ty: Type,
    },
}

/// Per-module artifacts of the checker.
#[derive(Debug, Default)]
pub struct ModuleTypes {
    /// Inferred type of every checked expression node.
    pub expr_types: HashMap<NodeId, Type>,
    /// Resolution of member expressions.
    pub member_refs: HashMap<NodeId, MemberRef>,
    /// Resolution of call expressions.
    pub call_targets: HashMap<NodeId, CallTarget>,
    /// Layouts of `@map` struct declarations.
    pub map_layouts: BTreeMap<SymbolId, MapLayout>,
}

impl ModuleTypes {
    /// Type computed for `node`, defaulting to `Unknown`.
    pub fn type_of(&self, node: NodeId) -> Type {
        self.expr_types.get(&node).cloned().unwrap_or(Type::Unknown)
    }
}

/// Pass 3 entry point.
pub struct TypeChecker;

impl TypeChecker {
    /// Check all modules, filling inferred symbol types in `table`.
    pub fn run(asts: &[Ast], table: &mut SymbolTable) -> PassResult<Vec<ModuleTypes>> {
        let span = debug_span!("type_checker");
        let _guard = span.enter();

        let mut sink = DiagnosticSink::default();
        let mut type_table = TypeTable::new();
        let mut modules = Vec::with_capacity(asts.len());
        for (index, ast) in asts.iter().enumerate() {
            let module = ModuleId(index as u32);
            let mut ctx = Checker {
                ast,
                table,
                module,
                types: &mut type_table,
                sink: &mut sink,
                out: ModuleTypes::default(),
                current_return: None,
                loop_depth: 0,
            };
            ctx.check_module();
            modules.push(ctx.out);
        }
        tracing::debug!(
            modules = modules.len(),
            compat_queries = type_table.cache_len(),
            "type checking finished"
        );
        PassResult::from_sink(modules, sink)
    }
}

struct Checker<'a> {
    ast: &'a Ast,
    table: &'a mut SymbolTable,
    module: ModuleId,
    types: &'a mut TypeTable,
    sink: &'a mut DiagnosticSink,
    out: ModuleTypes,
    current_return: Option<Type>,
    loop_depth: u32,
}

impl Checker<'_> {
    fn check_module(&mut self) {
        let Some(root) = self.ast.root() else {
            return;
        };
        let NodeKind::Program { declarations, .. } = self.ast.kind(root) else {
            return;
        };
        let declarations = declarations.clone();
        // Map layouts first: function bodies reference mapped fields.
        for &decl in &declarations {
            self.layout_map_decl(self.unwrap_export(decl));
        }
        for &decl in &declarations {
            self.check_declaration(self.unwrap_export(decl));
        }
    }

    fn unwrap_export(&self, node: NodeId) -> NodeId {
        match self.ast.kind(node) {
            NodeKind::Export { declaration } => *declaration,
            _ => node,
        }
    }

    fn node_ref(&self, node: NodeId) -> NodeRef {
        NodeRef::new(self.module, node)
    }

    fn error(&mut self, code: DiagnosticCode, node: NodeId, message: impl Into<String>) {
        self.sink
            .push(Diagnostic::error(code, message).at(self.ast.location(node).clone()));
    }

    fn layout_map_decl(&mut self, node: NodeId) {
        let (fields, sequential) = match self.ast.kind(node) {
            NodeKind::SequentialStructMapDecl { fields, .. } => (fields.clone(), true),
            NodeKind::ExplicitStructMapDecl { fields, .. } => (fields.clone(), false),
            _ => return,
        };
        let Some(symbol_id) = self.table.declaration(self.node_ref(node)) else {
            return;
        };
        let base = self.table.symbol(symbol_id).address.unwrap_or(0);

        let mut layout = MapLayout {
            base,
            size: 0,
            fields: BTreeMap::new(),
        };
        let mut cursor: u16 = 0;
        for field in fields {
            let ty = resolve_annotation(self.ast, self.table, self.module, &field.annotation, self.sink);
            let declared_size = u16::try_from(ty.size_in_bytes()).unwrap_or(0).max(1);
            let (offset, size) = match (sequential, field.offset) {
                // Sequential structs pack fields in declaration order.
                (true, _) | (false, None) => {
                    let offset = cursor;
                    cursor = cursor.saturating_add(declared_size);
                    (offset, declared_size)
                }
                (false, Some(FieldOffset::At(at))) => (at, declared_size),
                (false, Some(FieldOffset::Range(from, to))) => {
                    let size = to.saturating_sub(from).saturating_add(1);
                    (from, size)
                }
            };
            layout.size = layout.size.max(offset.saturating_add(size));
            layout.fields.insert(
                field.name.clone(),
                MapFieldLayout { offset, size, ty },
            );
        }
        self.out.map_layouts.insert(symbol_id, layout);
    }

    fn check_declaration(&mut self, node: NodeId) {
        match self.ast.kind(node) {
            NodeKind::FunctionDecl { body, .. } => {
                let body = *body;
                let Some(symbol_id) = self.table.declaration(self.node_ref(node)) else {
                    return;
                };
                let ret = match self.table.symbol(symbol_id).ty.clone() {
                    Some(Type::Function { ret, .. }) => *ret,
                    _ => Type::Unknown,
                };
                let saved = self.current_return.replace(ret);
                if let Some(body) = body {
                    self.check_statement(body);
                }
                self.current_return = saved;
            }
            NodeKind::VariableDecl { .. } => self.check_variable_decl(node),
            _ => {}
        }
    }

    fn check_variable_decl(&mut self, node: NodeId) {
        let NodeKind::VariableDecl {
            name,
            constant,
            initializer,
            ..
        } = self.ast.kind(node)
        else {
            return;
        };
        let (name, constant, initializer) = (name.clone(), *constant, *initializer);
        let symbol_id = self.table.declaration(self.node_ref(node));
        let declared = symbol_id.and_then(|id| self.table.symbol(id).ty.clone());

        match (initializer, declared) {
            (Some(init), Some(declared)) => {
                let init_ty = self.check_expr(init);
                match self.types.compatibility(&init_ty, &declared) {
                    Compatibility::Identical | Compatibility::Compatible => {}
                    Compatibility::RequiresConversion => {
                        self.error(
                            DiagnosticCode::NarrowingConversion,
                            node,
                            format!(
                                "initializing `{name}: {declared}` with `{init_ty}` narrows; convert explicitly"
                            ),
                        );
                    }
                    Compatibility::Incompatible => {
                        self.error(
                            DiagnosticCode::TypeMismatch,
                            node,
                            format!("cannot initialize `{name}: {declared}` with `{init_ty}`"),
                        );
                    }
                }
            }
            (Some(init), None) => {
                // Inferred declaration.
                let init_ty = self.check_expr(init);
                if let Some(id) = symbol_id {
                    self.table.symbol_mut(id).ty = Some(init_ty);
                }
            }
            (None, Some(_)) => {
                if constant {
                    self.error(
                        DiagnosticCode::TypeMismatch,
                        node,
                        format!("constant `{name}` needs an initializer"),
                    );
                }
            }
            (None, None) => {
                self.error(
                    DiagnosticCode::TypeMismatch,
                    node,
                    format!("`{name}` needs a type annotation or an initializer"),
                );
            }
        }
    }

    fn check_statement(&mut self, node: NodeId) {
        match self.ast.kind(node).clone() {
            NodeKind::Block { statements } => {
                for stmt in statements {
                    self.check_statement(stmt);
                }
            }
            NodeKind::VariableDecl { .. } => self.check_variable_decl(node),
            NodeKind::ExpressionStmt { expression } => {
                self.check_expr(expression);
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.check_condition(condition);
                self.check_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_statement(else_branch);
                }
            }
            NodeKind::While { condition, body } => {
                self.check_condition(condition);
                self.loop_depth += 1;
                self.check_statement(body);
                self.loop_depth -= 1;
            }
            NodeKind::DoWhile { body, condition } => {
                self.loop_depth += 1;
                self.check_statement(body);
                self.loop_depth -= 1;
                self.check_condition(condition);
            }
            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.check_statement(init);
                }
                if let Some(condition) = condition {
                    self.check_condition(condition);
                }
                self.loop_depth += 1;
                if let Some(update) = update {
                    self.check_statement(update);
                }
                self.check_statement(body);
                self.loop_depth -= 1;
            }
            NodeKind::Match { scrutinee, arms } => {
                let scrutinee_ty = self.check_expr(scrutinee);
                for arm in arms {
                    if let Some(pattern) = arm.pattern {
                        let pattern_ty = self.check_expr(pattern);
                        if !self.types.can_assign(&pattern_ty, &scrutinee_ty) {
                            self.error(
                                DiagnosticCode::TypeMismatch,
                                pattern,
                                format!(
                                    "match pattern `{pattern_ty}` does not fit scrutinee `{scrutinee_ty}`"
                                ),
                            );
                        }
                    }
                    self.check_statement(arm.body);
                }
            }
            NodeKind::Return { value } => {
                let expected = self.current_return.clone().unwrap_or(Type::Void);
                match value {
                    Some(value) => {
                        let actual = self.check_expr(value);
                        if !self.types.can_assign(&actual, &expected) {
                            self.error(
                                DiagnosticCode::ReturnTypeMismatch,
                                node,
                                format!("returning `{actual}` from a function returning `{expected}`"),
                            );
                        }
                    }
                    None => {
                        if !matches!(expected, Type::Void | Type::Unknown) {
                            self.error(
                                DiagnosticCode::ReturnTypeMismatch,
                                node,
                                format!("missing return value in a function returning `{expected}`"),
                            );
                        }
                    }
                }
            }
            NodeKind::Break => {
                if self.loop_depth == 0 {
                    self.error(DiagnosticCode::BreakOutsideLoop, node, "`break` outside a loop");
                }
            }
            NodeKind::Continue => {
                if self.loop_depth == 0 {
                    self.error(
                        DiagnosticCode::ContinueOutsideLoop,
                        node,
                        "`continue` outside a loop",
                    );
                }
            }
            NodeKind::Error => {}
            // An expression in statement position (e.g. a bare assignment).
            other if other.is_expression() => {
                self.check_expr(node);
            }
            _ => {}
        }
    }

    fn check_condition(&mut self, node: NodeId) {
        let ty = self.check_expr(node);
        if !self.types.can_assign(&ty, &Type::Bool) {
            self.error(
                DiagnosticCode::TypeMismatch,
                node,
                format!("condition must be boolean-compatible, found `{ty}`"),
            );
        }
    }

    fn check_expr(&mut self, node: NodeId) -> Type {
        if let Some(cached) = self.out.expr_types.get(&node) {
            return cached.clone();
        }
        let ty = self.compute_expr_type(node);
        self.out.expr_types.insert(node, ty.clone());
        ty
    }

    fn compute_expr_type(&mut self, node: NodeId) -> Type {
        match self.ast.kind(node).clone() {
            NodeKind::Literal(LiteralValue::Number(n)) => {
                if n <= u32::from(u8::MAX) {
                    Type::Byte
                } else {
                    Type::Word
                }
            }
            NodeKind::Literal(LiteralValue::Bool(_)) => Type::Bool,
            NodeKind::Literal(LiteralValue::Str(_)) => Type::StringLit,
            NodeKind::Identifier(_) => self
                .table
                .resolution(self.node_ref(node))
                .and_then(|id| self.table.symbol(id).ty.clone())
                .unwrap_or(Type::Unknown),
            NodeKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.check_expr(lhs);
                let rhs_ty = self.check_expr(rhs);
                match binary_result_type(op, &lhs_ty, &rhs_ty) {
                    Some(ty) => ty,
                    None => {
                        self.error(
                            DiagnosticCode::InvalidOperand,
                            node,
                            format!("operator `{op}` cannot combine `{lhs_ty}` and `{rhs_ty}`"),
                        );
                        Type::Unknown
                    }
                }
            }
            NodeKind::Unary { op, operand } => {
                if matches!(op, blend65_ast::UnaryOp::AddressOf) && !self.is_lvalue(operand) {
                    self.error(
                        DiagnosticCode::InvalidOperand,
                        node,
                        "`&` needs an addressable operand",
                    );
                    return Type::Unknown;
                }
                let operand_ty = self.check_expr(operand);
                match unary_result_type(op, &operand_ty) {
                    Some(ty) => ty,
                    None => {
                        self.error(
                            DiagnosticCode::InvalidOperand,
                            node,
                            format!("operator `{op}` cannot apply to `{operand_ty}`"),
                        );
                        Type::Unknown
                    }
                }
            }
            NodeKind::Assignment { target, value } => self.check_assignment(node, target, value),
            NodeKind::Call { callee, arguments } => self.check_call(node, callee, &arguments),
            NodeKind::Index { base, index } => {
                let base_ty = self.check_expr(base);
                let index_ty = self.check_expr(index);
                if !index_ty.is_numeric() {
                    self.error(
                        DiagnosticCode::InvalidOperand,
                        index,
                        format!("array index must be numeric, found `{index_ty}`"),
                    );
                }
                match base_ty {
                    Type::Array { element, .. } => *element,
                    Type::Unknown => Type::Unknown,
                    other => {
                        self.error(
                            DiagnosticCode::InvalidOperand,
                            node,
                            format!("cannot index into `{other}`"),
                        );
                        Type::Unknown
                    }
                }
            }
            NodeKind::Member { base, member } => self.check_member(node, base, &member),
            NodeKind::Error => Type::Unknown,
            _ => Type::Unknown,
        }
    }

    fn check_assignment(&mut self, node: NodeId, target: NodeId, value: NodeId) -> Type {
        if !self.is_lvalue(target) {
            self.error(
                DiagnosticCode::InvalidOperand,
                target,
                "left side of `=` is not assignable",
            );
        }
        if let Some(symbol) = self
            .table
            .resolution(self.node_ref(target))
            .filter(|_| matches!(self.ast.kind(target), NodeKind::Identifier(_)))
        {
            if self.table.symbol(symbol).kind == SymbolKind::Constant {
                let name = self.table.symbol(symbol).name.clone();
                self.error(
                    DiagnosticCode::InvalidOperand,
                    node,
                    format!("cannot assign to constant `{name}`"),
                );
            }
        }
        let target_ty = self.check_expr(target);
        let value_ty = self.check_expr(value);
        match self.types.compatibility(&value_ty, &target_ty) {
            Compatibility::Identical | Compatibility::Compatible => {}
            Compatibility::RequiresConversion => {
                self.error(
                    DiagnosticCode::NarrowingConversion,
                    node,
                    format!("assigning `{value_ty}` to `{target_ty}` narrows; convert explicitly"),
                );
            }
            Compatibility::Incompatible => {
                self.error(
                    DiagnosticCode::TypeMismatch,
                    node,
                    format!("cannot assign `{value_ty}` to `{target_ty}`"),
                );
            }
        }
        // The assignment expression's value is the left-hand type.
        target_ty
    }

    fn check_call(&mut self, node: NodeId, callee: NodeId, arguments: &[NodeId]) -> Type {
        let callee_symbol = self.table.resolution(self.node_ref(callee));
        let callee_ty = self.check_expr(callee);
        let Type::Function { params, ret } = callee_ty else {
            if !matches!(callee_ty, Type::Unknown) {
                self.error(
                    DiagnosticCode::InvalidOperand,
                    callee,
                    format!("`{callee_ty}` is not callable"),
                );
            }
            for &arg in arguments {
                self.check_expr(arg);
            }
            return Type::Unknown;
        };

        if let Some(symbol) = callee_symbol {
            let resolved = self
                .table
                .symbol(symbol)
                .imported_from
                .unwrap_or(symbol);
            let target = if self.table.symbol(resolved).decl.is_none() {
                CallTarget::Intrinsic(self.table.symbol(resolved).name.clone())
            } else {
                CallTarget::Function(resolved)
            };
            self.out.call_targets.insert(node, target);
        }

        if arguments.len() != params.len() {
            self.error(
                DiagnosticCode::ArityMismatch,
                node,
                format!("expected {} argument(s), found {}", params.len(), arguments.len()),
            );
        }
        for (&arg, param) in arguments.iter().zip(&params) {
            let arg_ty = self.check_expr(arg);
            if !self.types.can_assign(&arg_ty, param) {
                self.error(
                    DiagnosticCode::TypeMismatch,
                    arg,
                    format!("argument `{arg_ty}` does not fit parameter `{param}`"),
                );
            }
        }
        for &arg in arguments.iter().skip(params.len()) {
            self.check_expr(arg);
        }
        *ret
    }

    fn check_member(&mut self, node: NodeId, base: NodeId, member: &str) -> Type {
        // Enum member: the resolver bound the whole member expression.
        if let Some(symbol) = self.table.resolution(self.node_ref(node)) {
            if self.table.symbol(symbol).kind == SymbolKind::EnumMember {
                if let Some(Type::Enum { members, .. }) = self.table.symbol(symbol).ty.clone() {
                    if let Some(&value) = members.get(member) {
                        let ty = self.table.symbol(symbol).ty.clone().unwrap_or(Type::Unknown);
                        self.out
                            .member_refs
                            .insert(node, MemberRef::EnumValue { value, ty: ty.clone() });
                        return ty;
                    }
                }
            }
        }
        // Map struct field.
        if let NodeKind::Identifier(_) = self.ast.kind(base) {
            if let Some(symbol) = self.table.resolution(self.node_ref(base)) {
                if self.table.symbol(symbol).storage == StorageClass::Map {
                    if let Some(layout) = self.out.map_layouts.get(&symbol) {
                        if let Some(field) = layout.fields.get(member) {
                            let reference = MemberRef::MapField {
                                symbol,
                                offset: field.offset,
                                size: field.size,
                                ty: field.ty.clone(),
                            };
                            let ty = field.ty.clone();
                            self.out.member_refs.insert(node, reference);
                            self.check_expr(base);
                            return ty;
                        }
                    }
                    let name = self.table.symbol(symbol).name.clone();
                    self.error(
                        DiagnosticCode::UnresolvedIdentifier,
                        node,
                        format!("map `{name}` has no field `{member}`"),
                    );
                    return Type::Unknown;
                }
            }
        }
        let base_ty = self.check_expr(base);
        if !matches!(base_ty, Type::Unknown) {
            self.error(
                DiagnosticCode::InvalidOperand,
                node,
                format!("`{base_ty}` has no member `{member}`"),
            );
        }
        Type::Unknown
    }

    fn is_lvalue(&self, node: NodeId) -> bool {
        matches!(
            self.ast.kind(node),
            NodeKind::Identifier(_) | NodeKind::Index { .. } | NodeKind::Member { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TypeResolver;
    use crate::symbol_table::SymbolTableBuilder;
    use blend65_ast::{AstBuilder, BinaryOp, TypeAnnotation};

    fn check(asts: Vec<Ast>) -> (SymbolTable, PassResult<Vec<ModuleTypes>>) {
        let built = SymbolTableBuilder::build(&asts);
        assert!(built.success, "{:?}", built.diagnostics);
        let mut table = built.data;
        let resolved = TypeResolver::run(&asts, &mut table);
        assert!(resolved.success, "{:?}", resolved.diagnostics);
        let checked = TypeChecker::run(&asts, &mut table);
        (table, checked)
    }

    fn one_function(statements: impl FnOnce(&mut AstBuilder) -> Vec<NodeId>) -> Vec<Ast> {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let stmts = statements(&mut b);
        let body = b.block(stmts);
        let f = b.function("f", vec![], None, Some(body));
        b.program(Some(module), vec![f]);
        vec![b.finish()]
    }

    #[test]
    fn literal_widths_are_inferred() {
        let mut captured = (None, None);
        let asts = one_function(|b| {
            let small = b.number(10);
            let large = b.number(1000);
            captured = (Some(small), Some(large));
            let x = b.let_decl("x", None, Some(small));
            let y = b.let_decl("y", None, Some(large));
            vec![x, y]
        });
        let (table, result) = check(asts);
        assert!(result.success, "{:?}", result.diagnostics);
        let types = &result.data[0];
        assert_eq!(types.type_of(captured.0.unwrap()), Type::Byte);
        assert_eq!(types.type_of(captured.1.unwrap()), Type::Word);
        assert_eq!(
            table.symbol(table.symbol_named("y").unwrap()).ty,
            Some(Type::Word)
        );
    }

    #[test]
    fn widening_initializer_is_accepted() {
        let asts = one_function(|b| {
            let v = b.number(5);
            vec![b.let_decl("w", Some(TypeAnnotation::named("word")), Some(v))]
        });
        let (_, result) = check(asts);
        assert!(result.success, "{:?}", result.diagnostics);
    }

    #[test]
    fn narrowing_initializer_is_rejected() {
        let asts = one_function(|b| {
            let v = b.number(1000);
            vec![b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(v))]
        });
        let (_, result) = check(asts);
        assert!(!result.success);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::NarrowingConversion));
    }

    #[test]
    fn arithmetic_promotes_and_comparison_is_bool() {
        let mut add = None;
        let mut cmp = None;
        let asts = one_function(|b| {
            let small = b.number(1);
            let x = b.let_decl("x", Some(TypeAnnotation::named("byte")), Some(small));
            let big = b.number(1000);
            let y = b.let_decl("y", Some(TypeAnnotation::named("word")), Some(big));
            let xr = b.ident("x");
            let yr = b.ident("y");
            let sum = b.binary(BinaryOp::Add, xr, yr);
            add = Some(sum);
            let sum_stmt = b.expr_stmt(sum);
            let xr2 = b.ident("x");
            let yr2 = b.ident("y");
            let less = b.binary(BinaryOp::Lt, xr2, yr2);
            cmp = Some(less);
            let less_stmt = b.expr_stmt(less);
            vec![x, y, sum_stmt, less_stmt]
        });
        let (_, result) = check(asts);
        assert!(result.success, "{:?}", result.diagnostics);
        let types = &result.data[0];
        assert_eq!(types.type_of(add.unwrap()), Type::Word);
        assert_eq!(types.type_of(cmp.unwrap()), Type::Bool);
    }

    #[test]
    fn call_arity_is_checked() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let p = b.parameter("n", TypeAnnotation::named("byte"));
        let empty = b.block(vec![]);
        let callee = b.function("twice", vec![p], Some(TypeAnnotation::named("byte")), Some(empty));
        let f_name = b.ident("twice");
        let call = b.call(f_name, vec![]);
        let stmt = b.expr_stmt(call);
        let body = b.block(vec![stmt]);
        let f = b.function("f", vec![], None, Some(body));
        b.program(Some(module), vec![callee, f]);
        let (_, result) = check(vec![b.finish()]);
        assert!(!result.success);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::ArityMismatch));
    }

    #[test]
    fn intrinsic_call_is_typed_and_tagged() {
        let mut call = None;
        let asts = one_function(|b| {
            let big = b.number(0x1234);
            let w = b.let_decl("w", Some(TypeAnnotation::named("word")), Some(big));
            let lo = b.ident("lo");
            let wr = b.ident("w");
            let c = b.call(lo, vec![wr]);
            call = Some(c);
            let decl = b.let_decl("l", Some(TypeAnnotation::named("byte")), Some(c));
            vec![w, decl]
        });
        let (_, result) = check(asts);
        assert!(result.success, "{:?}", result.diagnostics);
        let types = &result.data[0];
        assert_eq!(types.type_of(call.unwrap()), Type::Byte);
        assert_eq!(
            types.call_targets.get(&call.unwrap()),
            Some(&CallTarget::Intrinsic("lo".into()))
        );
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let asts = one_function(|b| vec![b.break_stmt()]);
        let (_, result) = check(asts);
        assert!(!result.success);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::BreakOutsideLoop));
    }

    #[test]
    fn return_type_is_enforced() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let big = b.number(1000);
        let ret = b.return_stmt(Some(big));
        let body = b.block(vec![ret]);
        let f = b.function("f", vec![], Some(TypeAnnotation::named("byte")), Some(body));
        b.program(Some(module), vec![f]);
        let (_, result) = check(vec![b.finish()]);
        assert!(!result.success);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::ReturnTypeMismatch));
    }

    #[test]
    fn sequential_map_struct_is_packed() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let addr = b.number(0xD000);
        let fields = vec![
            blend65_ast::MapField {
                name: "x".into(),
                annotation: TypeAnnotation::named("byte"),
                offset: None,
            },
            blend65_ast::MapField {
                name: "pos".into(),
                annotation: TypeAnnotation::named("word"),
                offset: None,
            },
            blend65_ast::MapField {
                name: "color".into(),
                annotation: TypeAnnotation::named("byte"),
                offset: None,
            },
        ];
        let map = b.alloc(NodeKind::SequentialStructMapDecl {
            name: "vic".into(),
            address: addr,
            fields,
        });
        b.program(Some(module), vec![map]);
        let (table, result) = check(vec![b.finish()]);
        assert!(result.success, "{:?}", result.diagnostics);
        let vic = table.symbol_named("vic").unwrap();
        let layout = result.data[0].map_layouts.get(&vic).expect("layout");
        assert_eq!(layout.base, 0xD000);
        assert_eq!(layout.fields["x"].offset, 0);
        assert_eq!(layout.fields["pos"].offset, 1);
        assert_eq!(layout.fields["color"].offset, 3);
        assert_eq!(layout.size, 4);
    }

    #[test]
    fn explicit_map_range_field_has_its_span() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let addr = b.number(0xD400);
        let fields = vec![blend65_ast::MapField {
            name: "voices".into(),
            annotation: TypeAnnotation::named("byte"),
            offset: Some(FieldOffset::Range(0, 20)),
        }];
        let map = b.alloc(NodeKind::ExplicitStructMapDecl {
            name: "sid".into(),
            address: addr,
            fields,
        });
        b.program(Some(module), vec![map]);
        let (table, result) = check(vec![b.finish()]);
        assert!(result.success, "{:?}", result.diagnostics);
        let sid = table.symbol_named("sid").unwrap();
        let layout = result.data[0].map_layouts.get(&sid).expect("layout");
        assert_eq!(layout.fields["voices"].offset, 0);
        assert_eq!(layout.fields["voices"].size, 21);
    }
}
