//! Typed three-address IL of the Blend65 compiler.
//!
//! Functions own their basic blocks and virtual registers in flat arenas;
//! blocks link to each other by [`BlockId`], instructions name registers by
//! [`RegId`]. The [`builder`] lowers a type-checked AST into this form;
//! SSA construction later mutates it in place.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod block;
pub mod builder;
mod function;
mod instruction;
mod meta;
mod module;
mod opcode;
mod register;
mod types;

pub use block::{BasicBlock, BlockId};
pub use function::{Function, Parameter};
pub use instruction::{Instruction, Operand};
pub use meta::{
    AddressingMode, AliasRegion, FrequencyBand, InductionRecord, InstructionMeta,
    Mos6502Register, OptimizationKey, Purity,
};
pub use module::{Global, ImportRecord, Module};
pub use opcode::{intrinsic_def, IntrinsicCategory, IntrinsicDef, IntrinsicFlags, Opcode};
pub use register::{RegId, VirtualRegister};
pub use types::IlType;
