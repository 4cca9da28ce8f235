//! Positions and spans in Blend65 source text.

use core::fmt;
use std::sync::Arc;

/// A point in a source file, one-based line and column.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    /// One-based line number.
    pub line: u32,
    /// One-based column number.
    pub column: u32,
    /// Byte offset from the start of the file.
    pub offset: u32,
}

impl Position {
    /// Position at the given line/column/offset.
    pub const fn new(line: u32, column: u32, offset: u32) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A contiguous span of source text in one file.
///
/// The file name is shared so locations clone cheaply; diagnostics hold many
/// of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceLocation {
    /// Name of the source file.
    pub file: Arc<str>,
    /// First position covered.
    pub start: Position,
    /// Position just past the last character covered.
    pub end: Position,
}

impl SourceLocation {
    /// Span between two positions of `file`.
    pub fn new(file: impl Into<Arc<str>>, start: Position, end: Position) -> Self {
        Self {
            file: file.into(),
            start,
            end,
        }
    }

    /// Zero-width location used for synthesized nodes.
    pub fn synthetic() -> Self {
        Self::new("<synthetic>", Position::default(), Position::default())
    }

    /// Smallest span covering both `self` and `other`.
    ///
    /// Spans from different files keep `self`'s file.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            file: self.file.clone(),
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_covers_both_spans() {
        let a = SourceLocation::new("main.b65", Position::new(1, 1, 0), Position::new(1, 5, 4));
        let b = SourceLocation::new("main.b65", Position::new(2, 1, 10), Position::new(2, 8, 17));
        let merged = a.merge(&b);
        assert_eq!(merged.start, a.start);
        assert_eq!(merged.end, b.end);
    }

    #[test]
    fn display_is_file_line_column() {
        let loc = SourceLocation::new("main.b65", Position::new(3, 7, 42), Position::new(3, 9, 44));
        assert_eq!(loc.to_string(), "main.b65:3:7");
    }
}
