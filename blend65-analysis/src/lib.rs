//! Analyses of the Blend65 middle-end.
//!
//! Control-flow graphs over the AST, the shared data-flow worklist with
//! its concrete analyses (liveness, reaching definitions, constant
//! propagation, GVN, local CSE, usage/purity/escape), natural-loop and
//! induction-variable analysis, SSA construction and verification over the
//! IL, and the fixed-order [`pipeline`] tying it all together.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod cfg;
pub mod dataflow;
mod facts;
mod graph;
pub mod loops;
pub mod pipeline;
pub mod ssa;

pub use cfg::{Cfg, CfgBuilder, CfgNode, CfgNodeId, CfgNodeKind};
pub use facts::{ConstFact, FactTable, NodeFacts};
pub use graph::{Dominators, FlowGraph};
pub use pipeline::{Pipeline, PipelineOutput, StopAfter};

#[cfg(test)]
mod tests;
