//! Scope tree and the symbol table that owns it.

use std::collections::BTreeMap;

use blend65_ast::NodeId;
use hashbrown::HashMap;

use crate::symbol::{Symbol, SymbolId};
use crate::{ModuleId, NodeRef};

/// Handle of a scope inside the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u32);

impl ScopeId {
    /// Index form for table lookups.
    pub const fn to_usize(self) -> usize {
        self.0 as usize
    }
}

/// What opened a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ScopeKind {
    /// Synthetic outermost scope holding the built-in intrinsics.
    Prelude,
    /// One per source module.
    Module,
    /// Function body plus parameters.
    Function,
    /// Loop body.
    Loop,
    /// `{ … }` block or an `if` branch.
    Block,
}

/// One scope: a name→symbol map plus tree links.
#[derive(Debug, Clone)]
pub struct Scope {
    /// This scope's handle.
    pub id: ScopeId,
    /// Kind of scope.
    pub kind: ScopeKind,
    /// Enclosing scope; `None` only for the prelude.
    pub parent: Option<ScopeId>,
    /// Child scopes in creation order.
    pub children: Vec<ScopeId>,
    /// Names declared directly in this scope.
    pub symbols: BTreeMap<String, SymbolId>,
    /// Node that opened the scope, when one exists.
    pub owner: Option<NodeRef>,
}

/// The whole-compilation symbol table: every scope and symbol of every
/// module, plus the cross-module export index.
///
/// Built once in pass 1 and then only *filled in*: types in pass 2,
/// usage counters during analysis. Node-keyed side maps use [`NodeRef`]
/// because node ids are per-arena.
#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    /// Dot-joined module path → that module's scope.
    module_roots: BTreeMap<String, ScopeId>,
    /// Module path → exported name → symbol.
    exports: BTreeMap<String, BTreeMap<String, SymbolId>>,
    /// Scope opened by a node (function decls, blocks, loop bodies).
    node_scopes: HashMap<NodeRef, ScopeId>,
    /// Identifier node → symbol it resolves to (filled by the resolver).
    resolutions: HashMap<NodeRef, SymbolId>,
    /// Declaring node → its symbol.
    declarations: HashMap<NodeRef, SymbolId>,
    /// Per-module type namespace: enum and alias declarations by name.
    type_names: HashMap<(ModuleId, String), NodeRef>,
    /// Module order as scanned; index is the `ModuleId`.
    module_paths: Vec<String>,
}

impl SymbolTable {
    /// Empty table with only the prelude scope.
    pub fn new() -> Self {
        let mut table = Self::default();
        table.scopes.push(Scope {
            id: ScopeId(0),
            kind: ScopeKind::Prelude,
            parent: None,
            children: Vec::new(),
            symbols: BTreeMap::new(),
            owner: None,
        });
        table
    }

    /// The prelude scope holding built-in intrinsics.
    pub fn prelude(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Open a child scope of `parent`.
    pub fn push_scope(&mut self, kind: ScopeKind, parent: ScopeId, owner: Option<NodeRef>) -> ScopeId {
        let id = ScopeId(u32::try_from(self.scopes.len()).expect("scope count exceeds u32"));
        self.scopes.push(Scope {
            id,
            kind,
            parent: Some(parent),
            children: Vec::new(),
            symbols: BTreeMap::new(),
            owner,
        });
        self.scopes[parent.to_usize()].children.push(id);
        if let Some(owner) = owner {
            self.node_scopes.insert(owner, id);
        }
        id
    }

    /// Register a module scope for `path`, creating it under the prelude.
    pub fn push_module(&mut self, path: String, owner: Option<NodeRef>) -> (ModuleId, ScopeId) {
        let scope = self.push_scope(ScopeKind::Module, self.prelude(), owner);
        let module = ModuleId(u32::try_from(self.module_paths.len()).expect("module count"));
        self.module_paths.push(path.clone());
        self.module_roots.insert(path, scope);
        (module, scope)
    }

    /// Borrow a scope.
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.to_usize()]
    }

    /// Borrow a symbol.
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.to_usize()]
    }

    /// Mutably borrow a symbol.
    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.to_usize()]
    }

    /// All symbols in declaration order.
    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    /// Declare `symbol` in `scope`.
    ///
    /// Returns the previous same-name symbol on duplicate, leaving the
    /// table unchanged (the caller turns this into a diagnostic).
    pub fn declare(&mut self, scope: ScopeId, symbol: Symbol) -> Result<SymbolId, SymbolId> {
        if let Some(existing) = self.scopes[scope.to_usize()].symbols.get(&symbol.name) {
            return Err(*existing);
        }
        let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol count exceeds u32"));
        self.scopes[scope.to_usize()]
            .symbols
            .insert(symbol.name.clone(), id);
        self.symbols.push(symbol);
        Ok(id)
    }

    /// Look `name` up from `scope`, climbing parents.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.scope(id);
            if let Some(found) = s.symbols.get(name) {
                return Some(*found);
            }
            current = s.parent;
        }
        None
    }

    /// Look `name` up in `scope` only, without climbing.
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scope(scope).symbols.get(name).copied()
    }

    /// Scope opened by `node`, if any.
    pub fn scope_of_node(&self, node: NodeRef) -> Option<ScopeId> {
        self.node_scopes.get(&node).copied()
    }

    /// Record that identifier `node` resolves to `symbol`.
    pub fn record_resolution(&mut self, node: NodeRef, symbol: SymbolId) {
        self.resolutions.insert(node, symbol);
    }

    /// Symbol an identifier node resolved to.
    pub fn resolution(&self, node: NodeRef) -> Option<SymbolId> {
        self.resolutions.get(&node).copied()
    }

    /// Record the symbol declared by `node`.
    pub fn record_declaration(&mut self, node: NodeRef, symbol: SymbolId) {
        self.declarations.insert(node, symbol);
    }

    /// Symbol declared by `node`.
    pub fn declaration(&self, node: NodeRef) -> Option<SymbolId> {
        self.declarations.get(&node).copied()
    }

    /// Convenience: symbol declared by `node` of `module`.
    pub fn declaration_at(&self, module: ModuleId, node: NodeId) -> Option<SymbolId> {
        self.declaration(NodeRef::new(module, node))
    }

    /// Record an export from `module_path`.
    ///
    /// Returns the previously exported symbol when the name is already
    /// exported.
    pub fn record_export(
        &mut self,
        module_path: &str,
        name: &str,
        symbol: SymbolId,
    ) -> Result<(), SymbolId> {
        let module_exports = self.exports.entry(module_path.to_string()).or_default();
        if let Some(existing) = module_exports.get(name) {
            return Err(*existing);
        }
        module_exports.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Exported name of a module, if both exist.
    pub fn export(&self, module_path: &str, name: &str) -> Option<SymbolId> {
        self.exports.get(module_path)?.get(name).copied()
    }

    /// All exports of a module.
    pub fn exports_of(&self, module_path: &str) -> Option<&BTreeMap<String, SymbolId>> {
        self.exports.get(module_path)
    }

    /// Module scope for a dot-joined path.
    pub fn module_scope(&self, path: &str) -> Option<ScopeId> {
        self.module_roots.get(path).copied()
    }

    /// Dot-joined path of `module`.
    pub fn module_path(&self, module: ModuleId) -> &str {
        &self.module_paths[module.to_usize()]
    }

    /// Number of modules scanned.
    pub fn module_count(&self) -> usize {
        self.module_paths.len()
    }

    /// Number of scopes, prelude included.
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Register a type-namespace name (enum or alias declaration).
    ///
    /// Returns the earlier declaration on duplicate.
    pub fn record_type_name(
        &mut self,
        module: ModuleId,
        name: &str,
        node: NodeRef,
    ) -> Result<(), NodeRef> {
        if let Some(existing) = self.type_names.get(&(module, name.to_string())) {
            return Err(*existing);
        }
        self.type_names.insert((module, name.to_string()), node);
        Ok(())
    }

    /// Declaring node of a type-namespace name.
    pub fn type_name(&self, module: ModuleId, name: &str) -> Option<NodeRef> {
        self.type_names.get(&(module, name.to_string())).copied()
    }

    /// First symbol with the given name, searching all scopes. Test helper;
    /// production code resolves through scopes.
    pub fn symbol_named(&self, name: &str) -> Option<SymbolId> {
        self.symbols
            .iter()
            .position(|s| s.name == name)
            .map(|i| SymbolId(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolKind;
    use blend65_ast::SourceLocation;

    fn dummy(name: &str) -> Symbol {
        Symbol::new(
            name,
            SymbolKind::Variable,
            None,
            SourceLocation::synthetic(),
        )
    }

    #[test]
    fn lookup_climbs_parent_scopes() {
        let mut table = SymbolTable::new();
        let (_, module) = table.push_module("main".into(), None);
        let inner = table.push_scope(ScopeKind::Block, module, None);
        let sym = table.declare(module, dummy("x")).unwrap();
        assert_eq!(table.lookup(inner, "x"), Some(sym));
        assert_eq!(table.lookup_local(inner, "x"), None);
    }

    #[test]
    fn same_scope_duplicate_is_rejected() {
        let mut table = SymbolTable::new();
        let (_, module) = table.push_module("main".into(), None);
        let first = table.declare(module, dummy("x")).unwrap();
        assert_eq!(table.declare(module, dummy("x")), Err(first));
    }

    #[test]
    fn shadowing_across_scopes_is_allowed() {
        let mut table = SymbolTable::new();
        let (_, module) = table.push_module("main".into(), None);
        let inner = table.push_scope(ScopeKind::Block, module, None);
        let outer_sym = table.declare(module, dummy("x")).unwrap();
        let inner_sym = table.declare(inner, dummy("x")).unwrap();
        assert_ne!(outer_sym, inner_sym);
        assert_eq!(table.lookup(inner, "x"), Some(inner_sym));
        assert_eq!(table.lookup(module, "x"), Some(outer_sym));
    }

    #[test]
    fn duplicate_export_is_rejected() {
        let mut table = SymbolTable::new();
        let (_, module) = table.push_module("main".into(), None);
        let sym = table.declare(module, dummy("f")).unwrap();
        assert!(table.record_export("main", "f", sym).is_ok());
        assert_eq!(table.record_export("main", "f", sym), Err(sym));
    }
}
