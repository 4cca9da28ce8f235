//! Opcodes and the intrinsic table.

use bitflags::bitflags;

/// Opcode of one IL instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    /// Materialize a constant into a register.
    Const,
    /// Register-to-register move.
    Copy,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Unsigned division.
    Div,
    /// Unsigned remainder.
    Mod,
    /// Bitwise and (also lowers logical `&&` on bools).
    And,
    /// Bitwise or (also lowers logical `||` on bools).
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Two's-complement negation.
    Neg,
    /// Logical not.
    Not,
    /// Bitwise complement.
    BitNot,
    /// Low byte of a word.
    Lo,
    /// High byte of a word.
    Hi,
    /// Equality compare.
    CmpEq,
    /// Inequality compare.
    CmpNe,
    /// Unsigned less-than.
    CmpLt,
    /// Unsigned less-or-equal.
    CmpLe,
    /// Unsigned greater-than.
    CmpGt,
    /// Unsigned greater-or-equal.
    CmpGe,
    /// Conditional branch on a bool operand; two block targets.
    Branch,
    /// Unconditional jump; one block target.
    Jump,
    /// Call a function by name.
    Call,
    /// Return, optionally with a value.
    Return,
    /// Marks a path that cannot execute.
    Unreachable,
    /// Load a `@map` struct field; base and offset live in the metadata.
    MapLoadField,
    /// Store to a `@map` struct field.
    MapStoreField,
    /// Indexed load from a mapped or static range.
    MapLoadRange,
    /// Indexed store to a mapped or static range.
    MapStoreRange,
    /// SSA merge; operands pair with predecessors.
    Phi,
    /// Intrinsic call; behavior described by [`IntrinsicDef`].
    Intrinsic,
}

impl Opcode {
    /// True when this opcode must end its block.
    pub const fn is_terminator(self) -> bool {
        matches!(self, Self::Branch | Self::Jump | Self::Return | Self::Unreachable)
    }

    /// Operand order does not change the result.
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor | Self::CmpEq | Self::CmpNe
        )
    }

    /// Binary compare producing a bool.
    pub const fn is_compare(self) -> bool {
        matches!(
            self,
            Self::CmpEq | Self::CmpNe | Self::CmpLt | Self::CmpLe | Self::CmpGt | Self::CmpGe
        )
    }

    /// True when the instruction has no effect beyond its destination.
    /// Intrinsics answer through their [`IntrinsicFlags`], not here.
    pub const fn is_pure(self) -> bool {
        !matches!(
            self,
            Self::Branch
                | Self::Jump
                | Self::Call
                | Self::Return
                | Self::Unreachable
                | Self::MapLoadField
                | Self::MapStoreField
                | Self::MapLoadRange
                | Self::MapStoreRange
                | Self::Intrinsic
        )
    }

    /// True when the instruction writes memory.
    pub const fn writes_memory(self) -> bool {
        matches!(self, Self::MapStoreField | Self::MapStoreRange)
    }
}

/// Category of an intrinsic, for diagnostics and scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum IntrinsicCategory {
    /// Pure value computation.
    Arithmetic,
    /// Compiler utilities (`sizeof`).
    Utility,
    /// Talks to memory-mapped hardware.
    Hardware,
}

bitflags! {
    /// Behavior flags of an intrinsic.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IntrinsicFlags: u8 {
        /// Observable effect beyond the destination register.
        const SIDE_EFFECTS = 1 << 0;
        /// No instruction may be moved across it.
        const BARRIER = 1 << 1;
        /// Reads or writes volatile state; never folded or removed.
        const VOLATILE = 1 << 2;
        /// Foldable at compile time when every argument is constant.
        const COMPILE_TIME = 1 << 3;
    }
}

/// Static description of one intrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrinsicDef {
    /// Source-level name.
    pub name: &'static str,
    /// Category.
    pub category: IntrinsicCategory,
    /// Behavior flags.
    pub flags: IntrinsicFlags,
    /// Fixed cycle count, when one exists (`wait_raster` has none).
    pub cycle_count: Option<u32>,
}

impl IntrinsicDef {
    /// True when calls may be removed if the result is unused.
    pub const fn is_pure(&self) -> bool {
        !self
            .flags
            .intersects(IntrinsicFlags::SIDE_EFFECTS.union(IntrinsicFlags::VOLATILE))
    }
}

const INTRINSICS: &[IntrinsicDef] = &[
    IntrinsicDef {
        name: "lo",
        category: IntrinsicCategory::Arithmetic,
        flags: IntrinsicFlags::COMPILE_TIME,
        cycle_count: Some(2),
    },
    IntrinsicDef {
        name: "hi",
        category: IntrinsicCategory::Arithmetic,
        flags: IntrinsicFlags::COMPILE_TIME,
        cycle_count: Some(2),
    },
    IntrinsicDef {
        name: "sizeof",
        category: IntrinsicCategory::Utility,
        flags: IntrinsicFlags::COMPILE_TIME,
        cycle_count: Some(0),
    },
    IntrinsicDef {
        name: "peek",
        category: IntrinsicCategory::Hardware,
        flags: IntrinsicFlags::VOLATILE,
        cycle_count: Some(4),
    },
    IntrinsicDef {
        name: "poke",
        category: IntrinsicCategory::Hardware,
        flags: IntrinsicFlags::SIDE_EFFECTS.union(IntrinsicFlags::VOLATILE),
        cycle_count: Some(4),
    },
    IntrinsicDef {
        name: "wait_raster",
        category: IntrinsicCategory::Hardware,
        flags: IntrinsicFlags::SIDE_EFFECTS
            .union(IntrinsicFlags::BARRIER)
            .union(IntrinsicFlags::VOLATILE),
        cycle_count: None,
    },
];

/// Look an intrinsic up by source name.
pub fn intrinsic_def(name: &str) -> Option<&'static IntrinsicDef> {
    INTRINSICS.iter().find(|def| def.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn exactly_one_terminator_family() {
        let terminators: Vec<Opcode> = Opcode::iter().filter(|op| op.is_terminator()).collect();
        assert_eq!(
            terminators,
            vec![Opcode::Branch, Opcode::Jump, Opcode::Return, Opcode::Unreachable]
        );
    }

    #[test]
    fn commutativity_matches_the_source_operators() {
        assert!(Opcode::Add.is_commutative());
        assert!(Opcode::CmpEq.is_commutative());
        assert!(!Opcode::Sub.is_commutative());
        assert!(!Opcode::CmpLt.is_commutative());
        assert!(!Opcode::Shl.is_commutative());
    }

    #[test]
    fn intrinsic_table_is_consistent() {
        let poke = intrinsic_def("poke").unwrap();
        assert!(poke.flags.contains(IntrinsicFlags::SIDE_EFFECTS));
        assert!(!poke.is_pure());

        let lo = intrinsic_def("lo").unwrap();
        assert!(lo.is_pure());
        assert!(lo.flags.contains(IntrinsicFlags::COMPILE_TIME));

        let wait = intrinsic_def("wait_raster").unwrap();
        assert!(wait.flags.contains(IntrinsicFlags::BARRIER));
        assert_eq!(wait.cycle_count, None);

        assert!(intrinsic_def("nonsense").is_none());
    }

    #[test]
    fn opcodes_render_snake_case() {
        assert_eq!(Opcode::MapLoadField.to_string(), "map_load_field");
        assert_eq!(Opcode::CmpLe.to_string(), "cmp_le");
    }
}
