//! IL instructions: flat records with opcode-dependent fields.

use core::fmt;

use crate::block::BlockId;
use crate::meta::InstructionMeta;
use crate::opcode::Opcode;
use crate::register::RegId;

/// A source operand: a register or an embedded constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    /// Virtual register.
    Reg(RegId),
    /// Immediate constant.
    Imm(u32),
}

impl Operand {
    /// The register, if this operand is one.
    pub const fn reg(self) -> Option<RegId> {
        match self {
            Self::Reg(r) => Some(r),
            Self::Imm(_) => None,
        }
    }

    /// The immediate, if this operand is one.
    pub const fn imm(self) -> Option<u32> {
        match self {
            Self::Imm(v) => Some(v),
            Self::Reg(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(r) => write!(f, "{r}"),
            Self::Imm(v) => write!(f, "#{v}"),
        }
    }
}

impl From<RegId> for Operand {
    fn from(reg: RegId) -> Self {
        Self::Reg(reg)
    }
}

/// One three-address instruction.
///
/// A flat record: `targets` is used by branches, `incoming` only by φ,
/// `callee` by calls and intrinsics. Constructors keep the shapes honest.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    /// Opcode.
    pub opcode: Opcode,
    /// Destination register, when the opcode produces a value.
    pub dest: Option<RegId>,
    /// Source operands.
    pub operands: Vec<Operand>,
    /// Successor blocks of a branch (`[then, else]`) or jump (`[target]`).
    pub targets: Vec<BlockId>,
    /// φ operands keyed by predecessor block.
    pub incoming: Vec<(BlockId, Operand)>,
    /// Callee name for `Call` and `Intrinsic`.
    pub callee: Option<String>,
    /// Annotation bag.
    pub meta: InstructionMeta,
}

impl Instruction {
    fn raw(opcode: Opcode) -> Self {
        Self {
            opcode,
            dest: None,
            operands: Vec::new(),
            targets: Vec::new(),
            incoming: Vec::new(),
            callee: None,
            meta: InstructionMeta::default(),
        }
    }

    /// `dest = const value`.
    pub fn const_value(dest: RegId, value: u32) -> Self {
        let mut i = Self::raw(Opcode::Const);
        i.dest = Some(dest);
        i.operands.push(Operand::Imm(value));
        i
    }

    /// `dest = copy src`.
    pub fn copy(dest: RegId, src: Operand) -> Self {
        let mut i = Self::raw(Opcode::Copy);
        i.dest = Some(dest);
        i.operands.push(src);
        i
    }

    /// Binary operation `dest = op lhs, rhs`.
    pub fn binary(opcode: Opcode, dest: RegId, lhs: Operand, rhs: Operand) -> Self {
        let mut i = Self::raw(opcode);
        i.dest = Some(dest);
        i.operands.push(lhs);
        i.operands.push(rhs);
        i
    }

    /// Unary operation `dest = op src` (also `lo`/`hi`).
    pub fn unary(opcode: Opcode, dest: RegId, src: Operand) -> Self {
        let mut i = Self::raw(opcode);
        i.dest = Some(dest);
        i.operands.push(src);
        i
    }

    /// `branch cond, then_block, else_block`.
    pub fn branch(cond: Operand, then_block: BlockId, else_block: BlockId) -> Self {
        let mut i = Self::raw(Opcode::Branch);
        i.operands.push(cond);
        i.targets.push(then_block);
        i.targets.push(else_block);
        i
    }

    /// `jump target`.
    pub fn jump(target: BlockId) -> Self {
        let mut i = Self::raw(Opcode::Jump);
        i.targets.push(target);
        i
    }

    /// `return` with an optional value.
    pub fn ret(value: Option<Operand>) -> Self {
        let mut i = Self::raw(Opcode::Return);
        i.operands.extend(value);
        i
    }

    /// Unreachable terminator.
    pub fn unreachable() -> Self {
        Self::raw(Opcode::Unreachable)
    }

    /// `dest? = call name(args…)`.
    pub fn call(dest: Option<RegId>, callee: impl Into<String>, args: Vec<Operand>) -> Self {
        let mut i = Self::raw(Opcode::Call);
        i.dest = dest;
        i.operands = args;
        i.callee = Some(callee.into());
        i
    }

    /// `dest? = intrinsic name(args…)`.
    pub fn intrinsic(dest: Option<RegId>, name: impl Into<String>, args: Vec<Operand>) -> Self {
        let mut i = Self::raw(Opcode::Intrinsic);
        i.dest = dest;
        i.operands = args;
        i.callee = Some(name.into());
        i
    }

    /// φ with one operand per predecessor.
    pub fn phi(dest: RegId, incoming: Vec<(BlockId, Operand)>) -> Self {
        let mut i = Self::raw(Opcode::Phi);
        i.dest = Some(dest);
        i.incoming = incoming;
        i
    }

    /// Load a mapped field: base and offset go to the metadata.
    pub fn map_load_field(dest: RegId, base: u16, offset: u16) -> Self {
        let mut i = Self::raw(Opcode::MapLoadField);
        i.dest = Some(dest);
        i.meta.map_base = Some(base);
        i.meta.map_offset = Some(offset);
        i
    }

    /// Store `value` to a mapped field.
    pub fn map_store_field(base: u16, offset: u16, value: Operand) -> Self {
        let mut i = Self::raw(Opcode::MapStoreField);
        i.operands.push(value);
        i.meta.map_base = Some(base);
        i.meta.map_offset = Some(offset);
        i
    }

    /// Indexed load from a mapped range.
    pub fn map_load_range(dest: RegId, base: u16, len: u16, index: Operand) -> Self {
        let mut i = Self::raw(Opcode::MapLoadRange);
        i.dest = Some(dest);
        i.operands.push(index);
        i.meta.map_base = Some(base);
        i.meta.map_len = Some(len);
        i
    }

    /// Indexed store to a mapped range.
    pub fn map_store_range(base: u16, len: u16, index: Operand, value: Operand) -> Self {
        let mut i = Self::raw(Opcode::MapStoreRange);
        i.operands.push(index);
        i.operands.push(value);
        i.meta.map_base = Some(base);
        i.meta.map_len = Some(len);
        i
    }

    /// Attach metadata, builder-style.
    pub fn with_meta(mut self, meta: InstructionMeta) -> Self {
        self.meta = meta;
        self
    }

    /// True for block terminators.
    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    /// True for φ.
    pub fn is_phi(&self) -> bool {
        self.opcode == Opcode::Phi
    }

    /// Registers read by this instruction, φ incoming included.
    pub fn uses(&self) -> Vec<RegId> {
        self.operands
            .iter()
            .filter_map(|op| op.reg())
            .chain(self.incoming.iter().filter_map(|(_, op)| op.reg()))
            .collect()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dest) = self.dest {
            write!(f, "{dest} = ")?;
        }
        write!(f, "{}", self.opcode)?;
        if let Some(callee) = &self.callee {
            write!(f, " @{callee}")?;
        }
        for (i, op) in self.operands.iter().enumerate() {
            write!(f, "{} {op}", if i == 0 { "" } else { "," })?;
        }
        for (i, target) in self.targets.iter().enumerate() {
            write!(f, "{} -> {target}", if i == 0 { "" } else { "," })?;
        }
        for (block, op) in &self.incoming {
            write!(f, " [{block}: {op}]")?;
        }
        if let (Some(base), offset) = (self.meta.map_base, self.meta.map_offset) {
            write!(f, " !map(${base:04X}+{})", offset.unwrap_or(0))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_cover_phi_incoming() {
        let phi = Instruction::phi(
            RegId(5),
            vec![
                (BlockId(1), Operand::Reg(RegId(2))),
                (BlockId(2), Operand::Reg(RegId(3))),
            ],
        );
        assert_eq!(phi.uses(), vec![RegId(2), RegId(3)]);
    }

    #[test]
    fn branch_is_a_terminator_with_two_targets() {
        let b = Instruction::branch(Operand::Reg(RegId(0)), BlockId(1), BlockId(2));
        assert!(b.is_terminator());
        assert_eq!(b.targets, vec![BlockId(1), BlockId(2)]);
    }

    #[test]
    fn display_is_compact() {
        let add = Instruction::binary(
            Opcode::Add,
            RegId(3),
            Operand::Reg(RegId(1)),
            Operand::Imm(1),
        );
        assert_eq!(add.to_string(), "%3 = add %1, #1");
    }
}
