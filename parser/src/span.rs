/// Source location and span tracking.
///
/// Every token and AST node carries a [`Span`] recording where it appeared
/// in the source text: byte offset, line, and column for both ends.

/// A single position in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pos {
    /// Byte offset from the start of the input (0-based).
    pub offset: usize,
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based, counted in characters).
    pub column: usize,
}

impl Pos {
    pub const fn new(offset: usize, line: usize, column: usize) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }

    /// The very beginning of a source text.
    pub const fn origin() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A contiguous region of source text. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    pub const fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }

    /// A zero-width span at a single position.
    pub const fn point(pos: Pos) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        let start = if self.start.offset <= other.start.offset {
            self.start
        } else {
            other.start
        };
        let end = if self.end.offset >= other.end.offset {
            self.end
        } else {
            other.end
        };
        Span { start, end }
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn covers(&self, other: &Span) -> bool {
        self.start.offset <= other.start.offset
            && other.end.offset <= self.end.offset
    }

    pub fn len(&self) -> usize {
        self.end.offset.saturating_sub(self.start.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_orders_endpoints() {
        let a = Span::new(Pos::new(4, 1, 5), Pos::new(6, 1, 7));
        let b = Span::new(Pos::new(0, 1, 1), Pos::new(2, 1, 3));
        let m = a.merge(b);
        assert_eq!(m.start, b.start);
        assert_eq!(m.end, a.end);
        assert!(m.covers(&a));
        assert!(m.covers(&b));
        assert_eq!(m.len(), 6);
    }

    #[test]
    fn display_is_line_and_column() {
        let s = Span::new(Pos::new(10, 3, 2), Pos::new(12, 3, 4));
        assert_eq!(s.to_string(), "3:2");
    }
}
