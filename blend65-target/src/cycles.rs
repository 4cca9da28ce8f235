//! Per-instruction cycle estimation.
//!
//! Costs are expressed as operation classes with empirical 6502 unit
//! prices; an estimate is the class cost plus the addressing-mode penalty.
//! These are planning numbers for the register allocator and the
//! raster-budget check, not a cycle-exact simulation.

use blend65_ir::{AddressingMode, Instruction, Opcode};

/// Cycle cost classes; each embeds an operation count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleCost {
    /// Instruction fetch and decode.
    Fetch(u32),
    /// Plain 8-bit ALU operation.
    Alu(u32),
    /// 16-bit operation synthesized from byte ops.
    AluWide(u32),
    /// Software multiply/divide routine, per byte of width.
    MulDiv(u32),
    /// Conditional branch (taken).
    Branch(u32),
    /// Memory or hardware-register read.
    MemoryRead(u32),
    /// Memory or hardware-register write.
    MemoryWrite(u32),
    /// JSR/RTS pair plus argument setup.
    CallOverhead(u32),
    /// Accumulated cost of several operations.
    Accumulated(u32),
}

impl CycleCost {
    /// Cycles per unit of this class.
    pub const fn unit_price(&self) -> u32 {
        match self {
            // fetch + decode of a one-byte opcode
            Self::Fetch(_) => 2,
            // register ALU op on the accumulator
            Self::Alu(_) => 2,
            // carry-chained byte pair
            Self::AluWide(_) => 6,
            // software mul/div loop, per operand byte
            Self::MulDiv(_) => 40,
            // taken branch, same page
            Self::Branch(_) => 3,
            // absolute read
            Self::MemoryRead(_) => 4,
            // absolute write
            Self::MemoryWrite(_) => 4,
            // jsr + rts
            Self::CallOverhead(_) => 12,
            Self::Accumulated(c) => *c,
        }
    }

    /// Total cost `count × unit_price`.
    pub const fn cost(&self) -> u32 {
        match self {
            Self::Fetch(n)
            | Self::Alu(n)
            | Self::AluWide(n)
            | Self::MulDiv(n)
            | Self::Branch(n)
            | Self::MemoryRead(n)
            | Self::MemoryWrite(n)
            | Self::CallOverhead(n) => *n * self.unit_price(),
            Self::Accumulated(c) => *c,
        }
    }

    /// Combine two costs into an accumulated one.
    pub const fn join(self, other: Self) -> Self {
        Self::Accumulated(self.cost() + other.cost())
    }
}

/// Extra cycles an addressing mode costs over immediate operands.
pub const fn mode_penalty(mode: AddressingMode) -> u32 {
    match mode {
        AddressingMode::Implied | AddressingMode::Accumulator | AddressingMode::Immediate => 0,
        AddressingMode::ZeroPage => 1,
        AddressingMode::ZeroPageX | AddressingMode::ZeroPageY => 2,
        AddressingMode::Absolute => 2,
        AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => 3,
        AddressingMode::IndirectIndexed => 4,
        AddressingMode::Relative => 1,
    }
}

/// Estimated cycles for one IL instruction.
///
/// `wide` marks 16-bit operations; `mode` defaults to immediate when the
/// lowering has not picked one yet.
pub fn estimate_cycles(instruction: &Instruction, wide: bool, mode: AddressingMode) -> u32 {
    let base = match instruction.opcode {
        Opcode::Const | Opcode::Copy => {
            if wide {
                CycleCost::Fetch(1).join(CycleCost::Alu(2))
            } else {
                CycleCost::Fetch(1).join(CycleCost::Alu(1))
            }
        }
        Opcode::Add
        | Opcode::Sub
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Neg
        | Opcode::Not
        | Opcode::BitNot => {
            if wide {
                CycleCost::AluWide(1)
            } else {
                CycleCost::Alu(1).join(CycleCost::Fetch(1))
            }
        }
        Opcode::Mul | Opcode::Div | Opcode::Mod => {
            CycleCost::MulDiv(if wide { 2 } else { 1 })
        }
        Opcode::Lo | Opcode::Hi => CycleCost::Alu(1),
        Opcode::CmpEq
        | Opcode::CmpNe
        | Opcode::CmpLt
        | Opcode::CmpLe
        | Opcode::CmpGt
        | Opcode::CmpGe => {
            if wide {
                CycleCost::AluWide(1)
            } else {
                CycleCost::Alu(1).join(CycleCost::Fetch(1))
            }
        }
        Opcode::Branch => CycleCost::Branch(1).join(CycleCost::Alu(1)),
        Opcode::Jump => CycleCost::Branch(1),
        Opcode::Call => CycleCost::CallOverhead(1),
        Opcode::Return => CycleCost::Branch(2),
        Opcode::Unreachable | Opcode::Phi => CycleCost::Accumulated(0),
        Opcode::MapLoadField | Opcode::MapLoadRange => CycleCost::MemoryRead(1),
        Opcode::MapStoreField | Opcode::MapStoreRange => CycleCost::MemoryWrite(1),
        Opcode::Intrinsic => {
            // Intrinsics carry their own fixed count when one exists.
            return instruction
                .meta
                .cycle_estimate
                .unwrap_or(CycleCost::CallOverhead(1).cost());
        }
    };
    base.cost() + mode_penalty(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blend65_ir::{Operand, RegId};
    use test_case::test_case;

    #[test]
    fn wide_arithmetic_costs_more() {
        let add = Instruction::binary(
            Opcode::Add,
            RegId(0),
            Operand::Reg(RegId(1)),
            Operand::Imm(1),
        );
        let narrow = estimate_cycles(&add, false, AddressingMode::Immediate);
        let wide = estimate_cycles(&add, true, AddressingMode::Immediate);
        assert!(wide > narrow);
    }

    #[test]
    fn multiplication_dominates_addition() {
        let add = Instruction::binary(
            Opcode::Add,
            RegId(0),
            Operand::Reg(RegId(1)),
            Operand::Imm(1),
        );
        let mul = Instruction::binary(
            Opcode::Mul,
            RegId(0),
            Operand::Reg(RegId(1)),
            Operand::Imm(3),
        );
        assert!(
            estimate_cycles(&mul, false, AddressingMode::Immediate)
                > estimate_cycles(&add, false, AddressingMode::Immediate)
        );
    }

    #[test_case(AddressingMode::Immediate, AddressingMode::ZeroPage; "zp over immediate")]
    #[test_case(AddressingMode::ZeroPage, AddressingMode::Absolute; "absolute over zp")]
    #[test_case(AddressingMode::Absolute, AddressingMode::IndirectIndexed; "indirect over absolute")]
    fn mode_penalties_are_ordered(cheap: AddressingMode, expensive: AddressingMode) {
        assert!(mode_penalty(cheap) < mode_penalty(expensive));
    }

    #[test]
    fn phi_costs_nothing() {
        let phi = Instruction::phi(RegId(0), vec![]);
        assert_eq!(estimate_cycles(&phi, false, AddressingMode::Implied), 0);
    }
}
