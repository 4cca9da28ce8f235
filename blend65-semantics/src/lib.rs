//! Semantic analysis for the Blend65 compiler.
//!
//! Three passes run here, in order: scope and symbol construction
//! ([`SymbolTableBuilder`]), type resolution ([`TypeResolver`]), and type
//! checking ([`TypeChecker`]). Each returns a [`blend65_ast::PassResult`];
//! later passes consume the artifacts of earlier ones.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod checker;
mod resolver;
mod scope;
mod symbol;
mod symbol_table;
mod types;

pub use checker::{CallTarget, MapFieldLayout, MapLayout, MemberRef, ModuleTypes, TypeChecker};
pub use resolver::{const_eval, TypeResolver};
pub use scope::{Scope, ScopeId, ScopeKind, SymbolTable};
pub use symbol::{Symbol, SymbolId, SymbolKind};
pub use symbol_table::SymbolTableBuilder;
pub use types::{binary_result_type, unary_result_type, Compatibility, Type, TypeTable};

use blend65_ast::NodeId;

/// Handle of one source module inside a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display(fmt = "m{}", _0)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// Index form for table lookups.
    pub const fn to_usize(self) -> usize {
        self.0 as usize
    }
}

/// A node addressed across modules: arena handle plus owning module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef {
    /// Owning module.
    pub module: ModuleId,
    /// Node inside that module's arena.
    pub node: NodeId,
}

impl NodeRef {
    /// Pair up a module and node handle.
    pub const fn new(module: ModuleId, node: NodeId) -> Self {
        Self { module, node }
    }
}
