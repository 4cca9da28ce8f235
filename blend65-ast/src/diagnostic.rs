//! Diagnostics shared by every pass of the pipeline.

use core::fmt;

use crate::location::SourceLocation;

/// How bad a diagnostic is. Ordering is most-severe-first so `Error < Hint`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    /// Compilation must fail.
    Error,
    /// Suspicious but not fatal.
    Warning,
    /// Neutral information (e.g. optimization opportunities).
    Info,
    /// Suggestion for the author.
    Hint,
}

/// Closed set of diagnostic codes emitted by the middle-end.
///
/// Rendered in SCREAMING_SNAKE_CASE so downstream tooling can match on the
/// stable textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum DiagnosticCode {
    /// An `import` names a module that is not part of the compilation.
    ModuleNotFound,
    /// Two declarations with the same name in one scope.
    DuplicateDeclaration,
    /// `export` applied to something that is not a declaration.
    ExportRequiresDeclaration,
    /// The same name exported twice from one module.
    DuplicateExport,
    /// `export` or `import` outside module scope.
    InvalidModuleScope,
    /// An identifier that resolves to nothing.
    UnresolvedIdentifier,
    /// An import that names nothing exported by the source module.
    ImportNotExported,
    /// Assignment or argument of an incompatible type.
    TypeMismatch,
    /// word→byte assignment without an explicit conversion.
    NarrowingConversion,
    /// Operator applied to operands it does not accept.
    InvalidOperand,
    /// Call with the wrong number of arguments.
    ArityMismatch,
    /// `return` value incompatible with the function's return type.
    ReturnTypeMismatch,
    /// `break` outside any loop.
    BreakOutsideLoop,
    /// `continue` outside any loop.
    ContinueOutsideLoop,
    /// `@map` address or field offset is not numeric.
    InvalidMapAddress,
    /// `@zp`/`@map` address inside a reserved range.
    AddressInReservedRange,
    /// Two `@zp`/`@map` declarations whose ranges overlap.
    OverlappingAddresses,
    /// Unknown named type in an annotation.
    UnknownType,
    /// Requested target exists but is not implemented.
    TargetNotImplemented,
    /// Statement can never execute.
    UnreachableCode,
    /// A value is written and never read.
    DeadDefinition,
    /// Some path through the function misses a `return`.
    MissingReturn,
    /// Symbol never referenced.
    UnusedSymbol,
    /// Import never referenced.
    UnusedImport,
    /// Function never called and not exported.
    UnusedFunction,
    /// A data-flow pass hit its iteration cap before converging.
    IterationCapExceeded,
    /// Internal invariant broke; the pass aborted.
    InternalError,
    /// Same register defined more than once in SSA form.
    MultipleDefinitions,
    /// A use not dominated by its definition.
    DominanceViolation,
    /// Straight-line use before definition.
    UseBeforeDefinition,
    /// φ lacks an operand for some predecessor.
    PhiMissingOperand,
    /// φ operand names a block that is not a predecessor.
    PhiInvalidPredecessor,
    /// φ found after a non-φ instruction.
    PhiNotAtBlockStart,
    /// φ found in the entry block.
    PhiInEntryBlock,
    /// φ operand count differs from predecessor count.
    PhiOperandCountMismatch,
    /// Local subexpression already available in this block.
    CseOpportunity,
    /// Expression redundant with an earlier equivalent value.
    GvnRedundancy,
    /// Pure loop-invariant expression could be hoisted.
    HoistCandidate,
    /// Function classified as pure.
    PureFunction,
    /// Symbol scored as a strong zero-page candidate.
    ZeroPageCandidate,
}

/// One diagnostic produced by a pass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    /// Stable code.
    pub code: DiagnosticCode,
    /// Severity class.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Primary location, when one exists.
    pub location: Option<SourceLocation>,
    /// Secondary locations (e.g. the previous declaration of a duplicate).
    pub related: Vec<SourceLocation>,
}

impl Diagnostic {
    /// Diagnostic with the given severity.
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            related: Vec::new(),
        }
    }

    /// Error-severity diagnostic.
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, message)
    }

    /// Warning-severity diagnostic.
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warning, message)
    }

    /// Info-severity diagnostic.
    pub fn info(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Info, message)
    }

    /// Hint-severity diagnostic.
    pub fn hint(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Hint, message)
    }

    /// Attach the primary location.
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach a secondary location.
    pub fn related_to(mut self, location: SourceLocation) -> Self {
        self.related.push(location);
        self
    }

    /// True for `Severity::Error`.
    pub const fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{loc}: ")?;
        }
        write!(f, "{} {}: {}", self.severity, self.code, self.message)
    }
}
