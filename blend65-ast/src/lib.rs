//! Abstract syntax primitives of the Blend65 compiler.
//!
//! The parser (out of tree) produces an [`Ast`] arena; every later pass reads
//! it and attaches results to side tables keyed by [`NodeId`]. This crate
//! also owns the diagnostic types shared by the whole pipeline.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod builder;
mod diagnostic;
mod location;
mod node;
mod pass;

pub use builder::AstBuilder;
pub use diagnostic::{Diagnostic, DiagnosticCode, Severity};
pub use location::{Position, SourceLocation};
pub use node::{
    Ast, AstNode, BinaryOp, FieldOffset, ImportNames, LiteralValue, MapField, MatchArm, NodeId,
    NodeKind, StorageClass, TypeAnnotation, UnaryOp,
};
pub use pass::{AnalysisConfig, DiagnosticSink, PassResult};
