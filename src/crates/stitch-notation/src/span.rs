use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// A byte range of the original pattern source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn merge(&self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    pub fn to_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The spanned text, clamped to `source`
    pub fn snippet<'a>(&self, source: &'a str) -> &'a str {
        let end = self.end.min(source.len());
        let start = self.start.min(end);
        source.get(start..end).unwrap_or("")
    }

    /// 1-based line and column of the span start
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let upto = &source[..floor_char_boundary(source, self.start)];
        let line = upto.matches('\n').count() + 1;
        let column = upto.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        (line, column)
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

fn floor_char_boundary(source: &str, mut pos: usize) -> usize {
    pos = pos.min(source.len());
    while !source.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Text produced by a rewriting phase, carrying for every byte the source
/// offset it came from
///
/// Each phase (normalizer, repeat expander, index evaluator) builds a new
/// `MappedText` from the previous one, so any range of the final expression
/// maps back to the span of pattern source that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedText {
    text: String,
    origins: Vec<usize>,
}

impl MappedText {
    pub fn new() -> Self {
        MappedText::default()
    }

    /// Identity mapping over `source`
    pub fn from_source(source: &str) -> Self {
        MappedText {
            text: source.to_string(),
            origins: (0..source.len()).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn push(&mut self, ch: char, origin: usize) {
        self.text.push(ch);
        self.origins.extend(std::iter::repeat(origin).take(ch.len_utf8()));
    }

    /// Append `s`, attributing every byte to `origin`
    pub fn push_str(&mut self, s: &str, origin: usize) {
        self.text.push_str(s);
        self.origins.extend(std::iter::repeat(origin).take(s.len()));
    }

    /// Append a range of `other`, keeping its provenance
    pub fn push_slice(&mut self, other: &MappedText, range: Range<usize>) {
        self.text.push_str(&other.text[range.clone()]);
        self.origins.extend_from_slice(&other.origins[range]);
    }

    pub fn push_mapped(&mut self, other: &MappedText) {
        self.push_slice(other, 0..other.len());
    }

    pub fn slice(&self, range: Range<usize>) -> MappedText {
        MappedText {
            text: self.text[range.clone()].to_string(),
            origins: self.origins[range].to_vec(),
        }
    }

    /// Source offset of the byte at `offset`; one past the end maps to one
    /// past the last origin
    pub fn origin(&self, offset: usize) -> usize {
        match self.origins.get(offset) {
            Some(origin) => *origin,
            None => self.origins.last().map_or(0, |o| o + 1),
        }
    }

    /// Source span covering every byte in `range`
    pub fn source_span(&self, range: Range<usize>) -> Span {
        let covered = &self.origins[range.start.min(self.origins.len())..range.end.min(self.origins.len())];
        match (covered.iter().min(), covered.iter().max()) {
            (Some(lo), Some(hi)) => Span::new(*lo, hi + 1),
            _ => {
                let at = self.origin(range.start);
                Span::new(at, at)
            }
        }
    }

    /// Drop trailing `,` separators left behind by removed items
    pub fn trim_end_commas(&mut self) {
        while self.text.ends_with(',') {
            self.text.pop();
            self.origins.pop();
        }
    }
}

impl fmt::Display for MappedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_is_clamped() {
        let span = Span::new(4, 40);
        assert_eq!(span.len(), 36);
        assert_eq!(span.snippet("3ch\nsc"), "sc");
        assert_eq!(Span::new(9, 12).snippet("sc"), "");
        assert!(Span::new(2, 2).is_empty());
    }

    #[test]
    fn test_span_merge() {
        let merged = Span::new(3, 5).merge(Span::new(0, 4));
        assert_eq!(merged, Span::new(0, 5));
        assert_eq!(merged.to_range(), 0..5);
    }

    #[test]
    fn test_line_col() {
        let source = "9ch,turn\nsk,2sc";
        assert_eq!(Span::new(0, 1).line_col(source), (1, 1));
        assert_eq!(Span::new(12, 15).line_col(source), (2, 4));
        assert_eq!(Span::new(12, 15).snippet(source), "2sc");
    }

    #[test]
    fn test_mapped_text_keeps_provenance() {
        let source = MappedText::from_source("[sc,dc]*2");
        let mut out = MappedText::new();
        out.push_slice(&source, 1..6);
        out.push(',', 7);
        out.push_slice(&source, 1..6);
        assert_eq!(out.as_str(), "sc,dc,sc,dc");
        assert_eq!(out.source_span(9..11), Span::new(4, 6));
        assert_eq!(out.source_span(0..11), Span::new(1, 8));
        assert_eq!(out.origin(11), 6);
    }

    #[test]
    fn test_substitution_maps_to_occurrence() {
        let mut out = MappedText::new();
        out.push_str("sc@[0,", 0);
        out.push_str("12", 10);
        assert_eq!(out.source_span(6..8), Span::new(10, 11));
    }
}
