use serde::Serialize;

/// Byte range into an expression's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// A span of `len` bytes starting at `start`, never shorter than one.
    pub fn at(start: usize, len: usize) -> Self {
        Span { start, end: start + len.max(1) }
    }
}

/// Maps byte offsets to line/column positions. Expressions are usually one
/// line, but `@file` input may span several.
pub struct SourceMap {
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        SourceMap { line_starts }
    }

    /// Returns (line, col), both 1-based.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = self.line_starts.partition_point(|&start| start <= offset).saturating_sub(1);
        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// Text of the 1-based `line`, without its line terminator.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return "";
        };
        let end = self.line_starts.get(line).copied().unwrap_or(source.len());
        source[start..end].trim_end_matches(|c: char| c == '\n' || c == '\r')
    }
}
