//! Instruction metadata and the shared annotation vocabulary.
//!
//! Analyses write facts here as plain optional fields; downstream passes
//! read them without string matching. [`OptimizationKey`] documents the
//! closed annotation set.

use blend65_ast::SourceLocation;

/// 6502 addressing modes, used by the cycle estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum AddressingMode {
    /// No operand.
    Implied,
    /// Operand embedded in the instruction.
    Immediate,
    /// One-byte zero-page address.
    ZeroPage,
    /// Zero-page address indexed by X.
    ZeroPageX,
    /// Zero-page address indexed by Y.
    ZeroPageY,
    /// Two-byte absolute address.
    Absolute,
    /// Absolute address indexed by X.
    AbsoluteX,
    /// Absolute address indexed by Y.
    AbsoluteY,
    /// Indirect through a zero-page pointer, indexed by Y.
    IndirectIndexed,
    /// Branch-relative.
    Relative,
    /// Operates on the accumulator.
    Accumulator,
}

/// How hot an instruction is expected to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
pub enum FrequencyBand {
    /// Straight-line code outside loops.
    Cold,
    /// Inside one loop level.
    Warm,
    /// Nested two levels or deeper.
    Hot,
}

impl FrequencyBand {
    /// Band for a loop nesting depth.
    pub const fn from_loop_depth(depth: u32) -> Self {
        match depth {
            0 => Self::Cold,
            1 => Self::Warm,
            _ => Self::Hot,
        }
    }

    /// Multiplier applied to usage counts when scoring zero-page priority.
    pub const fn weight(self) -> u32 {
        match self {
            Self::Cold => 1,
            Self::Warm => 10,
            Self::Hot => 100,
        }
    }
}

/// Which memory region an access may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum AliasRegion {
    /// Ordinary RAM.
    Regular,
    /// Memory-mapped hardware registers.
    MappedHardware,
    /// Volatile state that may change between accesses.
    Volatile,
}

/// Coarse purity classification of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum Purity {
    /// Only reads its arguments.
    Pure,
    /// Reads memory or hardware but writes nothing.
    ReadsMemory,
    /// Writes memory or hardware.
    WritesMemory,
    /// Calls unknown code; assume anything.
    Impure,
}

/// Physical 6502 register a value would prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mos6502Register {
    /// Accumulator: arithmetic and logic.
    A,
    /// X index: loop counters, indexed addressing.
    X,
    /// Y index: loop counters, indirect-indexed addressing.
    Y,
}

/// Induction behavior of a loop variable.
///
/// `base = None` marks a basic induction variable (`i := i + stride`);
/// otherwise the record describes `var := stride·base + offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InductionRecord {
    /// The induction variable's name.
    pub variable: String,
    /// Basic IV this one derives from; `None` for a BIV.
    pub base: Option<String>,
    /// Per-iteration stride (BIV) or multiplier on the base (DIV).
    pub stride: i32,
    /// Additive offset; always 0 for a BIV.
    pub offset: i32,
    /// Literal initial value from the pre-header, when known (BIV only).
    pub initial: Option<u32>,
}

impl InductionRecord {
    /// True for a basic induction variable.
    pub const fn is_basic(&self) -> bool {
        self.base.is_none()
    }
}

/// The closed set of annotation keys the middle-end produces.
///
/// The facts themselves live as typed fields on [`InstructionMeta`] and the
/// analysis side tables; this enum documents the vocabulary and gives
/// tests something to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum OptimizationKey {
    /// Variables live on entry.
    LivenessIn,
    /// Variables live on exit.
    LivenessOut,
    /// Global value number.
    ValueNumber,
    /// Redundant with an earlier computation.
    Redundant,
    /// Suggested replacement for a redundant expression.
    Replacement,
    /// Statically known constant value.
    ConstantValue,
    /// Definitions reaching this point.
    ReachingDefs,
    /// Loop nesting depth.
    LoopDepth,
    /// Loop-invariant flag.
    LoopInvariant,
    /// Induction-variable record.
    InductionVariable,
    /// Preferred 6502 register.
    RegisterPreference,
    /// Zero-page priority score.
    ZpPriority,
    /// Estimated cycle count.
    CycleEstimate,
    /// Memory region an access may alias.
    AliasRegion,
    /// Purity classification.
    Purity,
    /// Address escapes the local frame.
    Escapes,
    /// Timing-sensitive instruction.
    RasterCritical,
    /// Execution-frequency band.
    FrequencyBand,
    /// Branch statically taken / not taken.
    BranchTaken,
    /// Local common-subexpression candidate.
    CseCandidate,
}

/// Metadata bag carried by every instruction.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstructionMeta {
    /// Source span the instruction was lowered from.
    pub location: Option<SourceLocation>,
    /// Addressing-mode hint for the cycle estimator.
    pub addressing_mode: Option<AddressingMode>,
    /// Loop nesting depth at the lowering site.
    pub loop_depth: Option<u32>,
    /// Execution-frequency band.
    pub frequency: Option<FrequencyBand>,
    /// Cycle-exact context; codegen must not perturb timing.
    pub raster_critical: bool,
    /// Estimated 6502 cycles.
    pub cycle_estimate: Option<u32>,
    /// Memory region touched, for loads/stores and intrinsics.
    pub alias_region: Option<AliasRegion>,
    /// `@map` base address (field and range forms).
    pub map_base: Option<u16>,
    /// `@map` field offset.
    pub map_offset: Option<u16>,
    /// `@map` range length in bytes.
    pub map_len: Option<u16>,
    /// Static array symbol for range accesses without a fixed base.
    pub map_symbol: Option<String>,
    /// Global value number of the produced value.
    pub value_number: Option<u32>,
    /// Name of the earlier value this computation duplicates.
    pub redundant_with: Option<String>,
    /// Statically known result.
    pub constant: Option<u32>,
    /// Expression is loop-invariant.
    pub invariant: bool,
    /// Induction-variable record of the destination.
    pub induction: Option<InductionRecord>,
    /// Preferred physical register for the destination.
    pub register_preference: Option<Mos6502Register>,
}

impl InstructionMeta {
    /// Metadata carrying only a source location.
    pub fn at(location: SourceLocation) -> Self {
        Self {
            location: Some(location),
            ..Self::default()
        }
    }
}
