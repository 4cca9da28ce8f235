//! Symbols: named entities declared somewhere in a program.

use blend65_ast::{NodeId, SourceLocation, StorageClass};

use crate::types::Type;
use crate::NodeRef;

/// Handle of a symbol inside the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display(fmt = "s{}", _0)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// Index form for table lookups.
    pub const fn to_usize(self) -> usize {
        self.0 as usize
    }
}

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum SymbolKind {
    /// Mutable variable.
    Variable,
    /// `const` binding.
    Constant,
    /// Function parameter.
    Parameter,
    /// Function.
    Function,
    /// Member of an `enum` declaration.
    EnumMember,
    /// Name brought in by an `import`.
    Import,
}

/// One declared entity.
///
/// Created by pass 1 with `ty = None`; the resolver fills types in pass 2
/// and the usage analyses fill the counters later.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Declared name (qualified for enum members, e.g. `Color.red`).
    pub name: String,
    /// Kind of entity.
    pub kind: SymbolKind,
    /// Resolved type; `None` until pass 2, and for inferred variables until
    /// pass 3.
    pub ty: Option<Type>,
    /// Declaration site.
    pub location: SourceLocation,
    /// Declaring node; `None` for built-in intrinsics.
    pub decl: Option<NodeRef>,
    /// Requested storage class.
    pub storage: StorageClass,
    /// True when exported from its module.
    pub exported: bool,
    /// Initializer expression node, if any.
    pub initializer: Option<NodeId>,
    /// Fixed address for `@zp`/`@map` declarations.
    pub address: Option<u16>,
    /// Parameter symbols, for functions.
    pub parameters: Vec<SymbolId>,
    /// Export this import resolved to, for `Import` symbols.
    pub imported_from: Option<SymbolId>,
    /// Number of reads observed by the usage analysis.
    pub reads: u32,
    /// Number of writes observed by the usage analysis.
    pub writes: u32,
    /// True when the symbol's address is taken somewhere.
    pub address_taken: bool,
}

impl Symbol {
    /// Fresh symbol, untyped and unused.
    pub fn new(
        name: impl Into<String>,
        kind: SymbolKind,
        decl: Option<NodeRef>,
        location: SourceLocation,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            ty: None,
            location,
            decl,
            storage: StorageClass::None,
            exported: false,
            initializer: None,
            address: None,
            parameters: Vec::new(),
            imported_from: None,
            reads: 0,
            writes: 0,
            address_taken: false,
        }
    }

    /// True for `Function` symbols declared without a body (stubs resolve
    /// to built-ins at link time).
    pub const fn is_function(&self) -> bool {
        matches!(self.kind, SymbolKind::Function)
    }

    /// Total references observed.
    pub const fn uses(&self) -> u32 {
        self.reads + self.writes
    }

    /// True when the usage analysis saw no reference at all.
    pub const fn is_unused(&self) -> bool {
        self.uses() == 0 && !self.address_taken
    }
}
