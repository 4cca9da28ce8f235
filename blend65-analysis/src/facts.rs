//! Analysis side tables keyed by node identity.
//!
//! Each analysis fills its own optional fields; readers get compile-time
//! checked access instead of a string-keyed bag. The key vocabulary is
//! documented by [`blend65_ir::OptimizationKey`].

use std::collections::BTreeSet;

use blend65_ir::InductionRecord;
use blend65_semantics::{NodeRef, SymbolId};
use hashbrown::HashMap;

/// Constant-propagation verdict for one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstFact {
    /// Statically known value.
    Known(u32),
    /// Proven to vary.
    Varying,
}

/// Facts attached to one AST node.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NodeFacts {
    /// Variables live entering the node's CFG position.
    pub live_in: Option<BTreeSet<SymbolId>>,
    /// Variables live leaving the node's CFG position.
    pub live_out: Option<BTreeSet<SymbolId>>,
    /// Global value number of the expression.
    pub value_number: Option<u32>,
    /// Name of the earlier variable holding the same value.
    pub redundant_with: Option<String>,
    /// Constant-propagation verdict.
    pub constant: Option<ConstFact>,
    /// Guard is statically taken (`true`) or not taken (`false`).
    pub branch_taken: Option<bool>,
    /// Loop nesting depth of the statement.
    pub loop_depth: Option<u32>,
    /// Expression is invariant in its innermost loop.
    pub loop_invariant: Option<bool>,
    /// Pure invariant worth hoisting.
    pub hoist_candidate: Option<bool>,
    /// Induction behavior of the variable this node updates.
    pub induction: Option<InductionRecord>,
    /// Earlier node computing the same local subexpression.
    pub cse_available_from: Option<NodeRef>,
}

/// Whole-compilation fact table.
#[derive(Debug, Default)]
pub struct FactTable {
    facts: HashMap<NodeRef, NodeFacts>,
}

impl FactTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts of `node`, created on first touch.
    pub fn entry(&mut self, node: NodeRef) -> &mut NodeFacts {
        self.facts.entry(node).or_default()
    }

    /// Facts of `node`, if any analysis touched it.
    pub fn get(&self, node: NodeRef) -> Option<&NodeFacts> {
        self.facts.get(&node)
    }

    /// Number of annotated nodes.
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// True when no node is annotated.
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}
