//! Source locations and spans shared by every pipeline stage.
//!
//! A [`Span`] is attached to every token, every AST node, and every
//! diagnostic so that an error raised deep in the optimizer or codegen can
//! still be reported against the original source text.

use std::fmt;
use std::path::PathBuf;

/// A single point in a source file. Lines and columns are 1-based, matching
/// the convention editors and terminals use when a user reports "line 12".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open range `[start, end)` within a single file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub file: PathBuf,
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(file: impl Into<PathBuf>, start: Position, end: Position) -> Self {
        Span {
            file: file.into(),
            start,
            end,
        }
    }

    /// A span covering a single point, useful for synthesized nodes that
    /// have no real source text (e.g. a LICM-hoisted binding).
    pub fn point(file: impl Into<PathBuf>, at: Position) -> Self {
        Span {
            file: file.into(),
            start: at,
            end: at,
        }
    }

    /// The smallest span that contains both `self` and `other`. Both must
    /// come from the same file; callers crossing file boundaries should not
    /// call this.
    pub fn merge(&self, other: &Span) -> Span {
        debug_assert_eq!(self.file, other.file, "cannot merge spans across files");
        let start = if pos_lt(&self.start, &other.start) {
            self.start
        } else {
            other.start
        };
        let end = if pos_lt(&self.end, &other.end) {
            other.end
        } else {
            self.end
        };
        Span {
            file: self.file.clone(),
            start,
            end,
        }
    }
}

fn pos_lt(a: &Position, b: &Position) -> bool {
    (a.line, a.column) < (b.line, b.column)
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}:{}", self.file.display(), self.start)
        } else {
            write!(
                f,
                "{}:{}-{}",
                self.file.display(),
                self.start,
                self.end
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_span_has_equal_start_and_end() {
        let s = Span::point("a.orus", Position::new(3, 4));
        assert_eq!(s.start, s.end);
    }

    #[test]
    fn merge_takes_widest_bounds() {
        let a = Span::new("a.orus", Position::new(1, 1), Position::new(1, 5));
        let b = Span::new("a.orus", Position::new(1, 3), Position::new(2, 1));
        let m = a.merge(&b);
        assert_eq!(m.start, Position::new(1, 1));
        assert_eq!(m.end, Position::new(2, 1));
    }

    #[test]
    fn display_collapses_single_point() {
        let s = Span::point("a.orus", Position::new(5, 2));
        assert_eq!(s.to_string(), "a.orus:5:2");
    }
}
