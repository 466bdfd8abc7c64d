use std::fmt::Display;

/// Half-open byte range into some source text.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        debug_assert!(start <= end, "Span start {start} is past its end {end}");
        Self { start, end }
    }
    pub fn at(pos: usize) -> Span {
        Self {
            start: pos,
            end: pos,
        }
    }
    pub fn empty() -> Span {
        Self { start: 0, end: 0 }
    }
    pub fn is_empty(self) -> bool {
        self.start >= self.end
    }
    pub fn len(self) -> usize {
        self.end.saturating_sub(self.start)
    }
    /// Moves the span by `offset`, used to turn block-relative offsets into absolute ones.
    pub fn shifted(self, offset: usize) -> Span {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
    pub fn join(self, other: Span) -> Span {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
    pub fn start(self) -> usize {
        self.start
    }
    pub fn end(self) -> usize {
        self.end
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[test]
fn test_span_arithmetic() {
    let a = Span::new(2, 6);
    assert_eq!(a.len(), 4);
    assert!(Span::at(3).is_empty());
    assert_eq!(a.shifted(10), Span::new(12, 16));
    assert_eq!(a.join(Span::new(0, 3)), Span::new(0, 6));
    assert_eq!(a.to_string(), "2..6");
}
