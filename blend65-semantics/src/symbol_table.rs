//! Pass 1: scope construction and symbol declaration.
//!
//! One walk over every AST. Declarations intern symbols in the current
//! scope; nested constructs open child scopes. Types stay unresolved
//! (`symbol.ty = None`) until pass 2. Import targets are linked at the end,
//! once every module's exports are known.

use blend65_ast::{
    Ast, Diagnostic, DiagnosticCode, DiagnosticSink, ImportNames, NodeId, NodeKind, PassResult,
    SourceLocation, StorageClass,
};
use tracing::debug_span;

use crate::scope::{ScopeId, ScopeKind, SymbolTable};
use crate::symbol::{Symbol, SymbolId, SymbolKind};
use crate::types::Type;
use crate::{ModuleId, NodeRef};

/// One pending import edge, resolved after all modules are scanned.
struct PendingImport {
    module: ModuleId,
    node: NodeId,
    location: SourceLocation,
    source_path: String,
    names: ImportNames,
    /// Import symbols declared for the named form, aligned with `names`.
    declared: Vec<SymbolId>,
}

/// Builds the whole-compilation [`SymbolTable`].
pub struct SymbolTableBuilder {
    table: SymbolTable,
    sink: DiagnosticSink,
    pending_imports: Vec<PendingImport>,
}

impl SymbolTableBuilder {
    /// Scan `asts` and build the symbol table.
    pub fn build(asts: &[Ast]) -> PassResult<SymbolTable> {
        let span = debug_span!("symbol_table");
        let _guard = span.enter();

        let mut builder = Self {
            table: SymbolTable::new(),
            sink: DiagnosticSink::default(),
            pending_imports: Vec::new(),
        };
        builder.declare_intrinsics();
        for ast in asts {
            builder.scan_module(ast);
        }
        builder.link_imports();
        tracing::debug!(
            modules = builder.table.module_count(),
            scopes = builder.table.scope_count(),
            diagnostics = builder.sink.diagnostics().len(),
            "symbol table built"
        );
        PassResult::from_sink(builder.table, builder.sink)
    }

    /// Built-in intrinsics live in the prelude so every module sees them.
    fn declare_intrinsics(&mut self) {
        let prelude = self.table.prelude();
        let intrinsics: [(&str, Vec<Type>, Type); 6] = [
            ("lo", vec![Type::Word], Type::Byte),
            ("hi", vec![Type::Word], Type::Byte),
            ("sizeof", vec![Type::Any], Type::Word),
            ("peek", vec![Type::Word], Type::Byte),
            ("poke", vec![Type::Word, Type::Byte], Type::Void),
            ("wait_raster", vec![Type::Byte], Type::Void),
        ];
        for (name, params, ret) in intrinsics {
            let mut symbol = Symbol::new(name, SymbolKind::Function, None, SourceLocation::synthetic());
            symbol.ty = Some(Type::function(params, ret));
            self.table
                .declare(prelude, symbol)
                .unwrap_or_else(|_| unreachable!("prelude starts empty"));
        }
    }

    fn scan_module(&mut self, ast: &Ast) {
        let Some(root) = ast.root() else {
            return;
        };
        let NodeKind::Program {
            module,
            declarations,
        } = ast.kind(root)
        else {
            return;
        };

        let path = module
            .and_then(|m| match ast.kind(m) {
                NodeKind::Module { path } => Some(path.join(".")),
                _ => None,
            })
            .unwrap_or_else(|| default_module_path(ast, root));

        let (module_id, scope) = self.table.push_module(path, None);
        for &decl in declarations {
            self.scan_top_level(module_id, ast, scope, decl);
        }
    }

    fn scan_top_level(&mut self, module: ModuleId, ast: &Ast, scope: ScopeId, node: NodeId) {
        match ast.kind(node) {
            NodeKind::Export { declaration } => {
                let declaration = *declaration;
                match ast.kind(declaration) {
                    NodeKind::FunctionDecl { .. }
                    | NodeKind::VariableDecl { .. }
                    | NodeKind::EnumDecl { .. }
                    | NodeKind::TypeDecl { .. }
                    | NodeKind::SimpleMapDecl { .. }
                    | NodeKind::RangeMapDecl { .. }
                    | NodeKind::SequentialStructMapDecl { .. }
                    | NodeKind::ExplicitStructMapDecl { .. } => {
                        let declared = self.scan_declaration(module, ast, scope, declaration, true);
                        if let Some(symbol) = declared {
                            let path = self.table.module_path(module).to_string();
                            let name = self.table.symbol(symbol).name.clone();
                            if let Err(previous) = self.table.record_export(&path, &name, symbol) {
                                let previous_loc = self.table.symbol(previous).location.clone();
                                self.sink.push(
                                    Diagnostic::error(
                                        DiagnosticCode::DuplicateExport,
                                        format!("module `{path}` already exports `{name}`"),
                                    )
                                    .at(ast.location(node).clone())
                                    .related_to(previous_loc),
                                );
                            }
                        }
                    }
                    _ => {
                        self.sink.push(
                            Diagnostic::error(
                                DiagnosticCode::ExportRequiresDeclaration,
                                "`export` must wrap a declaration",
                            )
                            .at(ast.location(node).clone()),
                        );
                    }
                }
            }
            NodeKind::Import { .. } => self.scan_import(module, ast, scope, node),
            _ => {
                self.scan_declaration(module, ast, scope, node, false);
            }
        }
    }

    fn scan_import(&mut self, module: ModuleId, ast: &Ast, scope: ScopeId, node: NodeId) {
        let NodeKind::Import { module_path, names } = ast.kind(node) else {
            return;
        };
        let location = ast.location(node).clone();
        let source_path = module_path.join(".");
        let mut declared = Vec::new();
        if let ImportNames::Named(list) = names {
            for name in list {
                let mut symbol = Symbol::new(
                    name.clone(),
                    SymbolKind::Import,
                    Some(NodeRef::new(module, node)),
                    location.clone(),
                );
                symbol.storage = StorageClass::None;
                match self.table.declare(scope, symbol) {
                    Ok(id) => declared.push(id),
                    Err(previous) => {
                        self.duplicate(ast, node, name, previous);
                    }
                }
            }
        }
        self.pending_imports.push(PendingImport {
            module,
            node,
            location,
            source_path,
            names: names.clone(),
            declared,
        });
    }

    /// Declare one declaration node. Returns the new symbol on success.
    fn scan_declaration(
        &mut self,
        module: ModuleId,
        ast: &Ast,
        scope: ScopeId,
        node: NodeId,
        exported: bool,
    ) -> Option<SymbolId> {
        let location = ast.location(node).clone();
        let node_ref = NodeRef::new(module, node);
        match ast.kind(node) {
            NodeKind::FunctionDecl {
                name,
                parameters,
                body,
                ..
            } => {
                let mut symbol = Symbol::new(name.clone(), SymbolKind::Function, Some(node_ref), location);
                symbol.exported = exported;
                let id = match self.table.declare(scope, symbol) {
                    Ok(id) => id,
                    Err(previous) => {
                        self.duplicate(ast, node, name, previous);
                        return None;
                    }
                };
                self.table.record_declaration(node_ref, id);

                let fn_scope = self.table.push_scope(ScopeKind::Function, scope, Some(node_ref));
                let mut param_ids = Vec::with_capacity(parameters.len());
                for &param in parameters {
                    let NodeKind::Parameter { name, .. } = ast.kind(param) else {
                        continue;
                    };
                    let param_ref = NodeRef::new(module, param);
                    let param_symbol = Symbol::new(
                        name.clone(),
                        SymbolKind::Parameter,
                        Some(param_ref),
                        ast.location(param).clone(),
                    );
                    match self.table.declare(fn_scope, param_symbol) {
                        Ok(pid) => {
                            self.table.record_declaration(param_ref, pid);
                            param_ids.push(pid);
                        }
                        Err(previous) => self.duplicate(ast, param, name, previous),
                    }
                }
                self.table.symbol_mut(id).parameters = param_ids;

                if let Some(body) = body {
                    // The body block shares the function scope, so statements
                    // see the parameters directly.
                    self.scan_body_block(module, ast, fn_scope, *body);
                }
                Some(id)
            }
            NodeKind::VariableDecl {
                name,
                constant,
                initializer,
                storage,
                ..
            } => {
                let kind = if *constant {
                    SymbolKind::Constant
                } else {
                    SymbolKind::Variable
                };
                let mut symbol = Symbol::new(name.clone(), kind, Some(node_ref), location);
                symbol.exported = exported;
                symbol.storage = *storage;
                symbol.initializer = *initializer;
                match self.table.declare(scope, symbol) {
                    Ok(id) => {
                        self.table.record_declaration(node_ref, id);
                        Some(id)
                    }
                    Err(previous) => {
                        self.duplicate(ast, node, name, previous);
                        None
                    }
                }
            }
            NodeKind::EnumDecl { name, members } => {
                if let Err(previous) = self.table.record_type_name(module, name, node_ref) {
                    self.duplicate_type(ast, node, name, previous);
                    return None;
                }
                // Members are addressable as `Enum.member`; each gets a
                // qualified symbol for diagnostics and usage tracking.
                for (member, _) in members {
                    let qualified = format!("{name}.{member}");
                    let member_symbol = Symbol::new(
                        qualified.clone(),
                        SymbolKind::EnumMember,
                        Some(node_ref),
                        ast.location(node).clone(),
                    );
                    if let Err(previous) = self.table.declare(scope, member_symbol) {
                        self.duplicate(ast, node, &qualified, previous);
                    }
                }
                None
            }
            NodeKind::TypeDecl { name, .. } => {
                if let Err(previous) = self.table.record_type_name(module, name, node_ref) {
                    self.duplicate_type(ast, node, name, previous);
                }
                None
            }
            NodeKind::SimpleMapDecl { name, .. }
            | NodeKind::RangeMapDecl { name, .. }
            | NodeKind::SequentialStructMapDecl { name, .. }
            | NodeKind::ExplicitStructMapDecl { name, .. } => {
                let mut symbol = Symbol::new(name.clone(), SymbolKind::Variable, Some(node_ref), location);
                symbol.exported = exported;
                symbol.storage = StorageClass::Map;
                match self.table.declare(scope, symbol) {
                    Ok(id) => {
                        self.table.record_declaration(node_ref, id);
                        Some(id)
                    }
                    Err(previous) => {
                        self.duplicate(ast, node, name, previous);
                        None
                    }
                }
            }
            NodeKind::Module { .. } => None,
            NodeKind::Import { .. } | NodeKind::Export { .. } => {
                // Imports and exports are only legal at module scope; the
                // top-level scanner already handled them there.
                self.sink.push(
                    Diagnostic::error(
                        DiagnosticCode::InvalidModuleScope,
                        "imports and exports are only allowed at module scope",
                    )
                    .at(ast.location(node).clone()),
                );
                None
            }
            NodeKind::Error => None,
            _ => None,
        }
    }

    /// Walk a block's statements in `scope` without opening a new scope.
    fn scan_body_block(&mut self, module: ModuleId, ast: &Ast, scope: ScopeId, block: NodeId) {
        if let NodeKind::Block { statements } = ast.kind(block) {
            for &stmt in statements {
                self.scan_statement(module, ast, scope, stmt);
            }
        } else {
            self.scan_statement(module, ast, scope, block);
        }
    }

    fn scan_statement(&mut self, module: ModuleId, ast: &Ast, scope: ScopeId, node: NodeId) {
        let node_ref = NodeRef::new(module, node);
        match ast.kind(node) {
            NodeKind::Block { statements } => {
                let block_scope = self.table.push_scope(ScopeKind::Block, scope, Some(node_ref));
                for &stmt in statements {
                    self.scan_statement(module, ast, block_scope, stmt);
                }
            }
            NodeKind::VariableDecl { .. } => {
                self.scan_declaration(module, ast, scope, node, false);
            }
            NodeKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                let (then_branch, else_branch) = (*then_branch, *else_branch);
                self.scan_statement(module, ast, scope, then_branch);
                if let Some(else_branch) = else_branch {
                    self.scan_statement(module, ast, scope, else_branch);
                }
            }
            NodeKind::While { body, .. } | NodeKind::DoWhile { body, .. } => {
                let body = *body;
                let loop_scope = self.table.push_scope(ScopeKind::Loop, scope, Some(node_ref));
                self.scan_body_block(module, ast, loop_scope, body);
            }
            NodeKind::For { init, body, .. } => {
                let (init, body) = (*init, *body);
                let loop_scope = self.table.push_scope(ScopeKind::Loop, scope, Some(node_ref));
                if let Some(init) = init {
                    self.scan_statement(module, ast, loop_scope, init);
                }
                self.scan_body_block(module, ast, loop_scope, body);
            }
            NodeKind::Match { arms, .. } => {
                for arm in arms {
                    self.scan_statement(module, ast, scope, arm.body);
                }
            }
            NodeKind::Import { .. } | NodeKind::Export { .. } => {
                self.sink.push(
                    Diagnostic::error(
                        DiagnosticCode::InvalidModuleScope,
                        "imports and exports are only allowed at module scope",
                    )
                    .at(ast.location(node).clone()),
                );
            }
            NodeKind::FunctionDecl { .. } => {
                // Nested functions are not part of the language; declare into
                // the enclosing scope anyway so the body is still analyzed.
                self.scan_declaration(module, ast, scope, node, false);
            }
            _ => {}
        }
    }

    /// Resolve every recorded import once all exports are known.
    fn link_imports(&mut self) {
        let pending = std::mem::take(&mut self.pending_imports);
        for import in pending {
            if self.table.module_scope(&import.source_path).is_none() {
                self.sink.push(
                    Diagnostic::error(
                        DiagnosticCode::ModuleNotFound,
                        format!("module `{}` is not part of this compilation", import.source_path),
                    )
                    .at(import.location.clone()),
                );
                continue;
            }
            match &import.names {
                ImportNames::Named(names) => {
                    for (name, &declared) in names.iter().zip(&import.declared) {
                        match self.table.export(&import.source_path, name) {
                            Some(target) => {
                                self.table.symbol_mut(declared).imported_from = Some(target);
                            }
                            None => {
                                self.sink.push(
                                    Diagnostic::error(
                                        DiagnosticCode::ImportNotExported,
                                        format!(
                                            "module `{}` does not export `{name}`",
                                            import.source_path
                                        ),
                                    )
                                    .at(import.location.clone()),
                                );
                            }
                        }
                    }
                }
                ImportNames::Wildcard => {
                    let Some(exports) = self.table.exports_of(&import.source_path).cloned() else {
                        continue;
                    };
                    let scope = self
                        .table
                        .module_scope(self.table.module_path(import.module))
                        .unwrap_or_else(|| self.table.prelude());
                    for (name, target) in exports {
                        let mut symbol = Symbol::new(
                            name.clone(),
                            SymbolKind::Import,
                            Some(NodeRef::new(import.module, import.node)),
                            import.location.clone(),
                        );
                        symbol.imported_from = Some(target);
                        if let Err(previous) = self.table.declare(scope, symbol) {
                            self.duplicate_named(&name, import.location.clone(), previous);
                        }
                    }
                }
            }
        }
    }

    fn duplicate(&mut self, ast: &Ast, node: NodeId, name: &str, previous: SymbolId) {
        let previous_loc = self.table.symbol(previous).location.clone();
        self.sink.push(
            Diagnostic::error(
                DiagnosticCode::DuplicateDeclaration,
                format!("`{name}` is already declared in this scope"),
            )
            .at(ast.location(node).clone())
            .related_to(previous_loc),
        );
    }

    fn duplicate_named(&mut self, name: &str, location: SourceLocation, previous: SymbolId) {
        let previous_loc = self.table.symbol(previous).location.clone();
        self.sink.push(
            Diagnostic::error(
                DiagnosticCode::DuplicateDeclaration,
                format!("`{name}` is already declared in this scope"),
            )
            .at(location)
            .related_to(previous_loc),
        );
    }

    fn duplicate_type(&mut self, ast: &Ast, node: NodeId, name: &str, _previous: NodeRef) {
        self.sink.push(
            Diagnostic::error(
                DiagnosticCode::DuplicateDeclaration,
                format!("type `{name}` is already declared in this module"),
            )
            .at(ast.location(node).clone()),
        );
    }
}

fn default_module_path(ast: &Ast, root: NodeId) -> String {
    let file = &ast.location(root).file;
    file.rsplit('/')
        .next()
        .unwrap_or(file)
        .trim_end_matches(".b65")
        .to_string()
}
