//! Line indexing over file text

use crate::extract::content_hash;

/// Byte offsets of line starts, consistent with `str::lines`
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut starts = Vec::new();
        if !text.is_empty() {
            starts.push(0);
            starts.extend(
                text.match_indices('\n')
                    .map(|(i, _)| i + 1)
                    .filter(|&start| start < text.len()),
            );
        }
        Self { text, starts }
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Content of the 0-indexed line, without its terminator
    pub fn line(&self, index: usize) -> Option<&'a str> {
        let start = *self.starts.get(index)?;
        let end = self.starts.get(index + 1).copied().unwrap_or(self.text.len());
        Some(strip_terminator(&self.text[start..end]))
    }

    /// Text of the 1-indexed inclusive span, without the final terminator
    pub fn span_text(&self, start_line: usize, end_line: usize) -> Option<&'a str> {
        if start_line == 0 || end_line < start_line || end_line > self.len() {
            return None;
        }
        let start = self.starts[start_line - 1];
        let end = self.starts.get(end_line).copied().unwrap_or(self.text.len());
        Some(strip_terminator(&self.text[start..end]))
    }

    /// Hash of a span's text
    pub fn span_hash(&self, start_line: usize, end_line: usize) -> Option<String> {
        self.span_text(start_line, end_line).map(content_hash)
    }

    /// Text from the 0-indexed line `from` up to (excluding) line `to`
    pub fn slice(&self, from: usize, to: usize) -> &'a str {
        let start = self.starts.get(from).copied().unwrap_or(self.text.len());
        let end = self.starts.get(to).copied().unwrap_or(self.text.len());
        &self.text[start..end.max(start)]
    }

    /// All lines, without terminators
    pub fn lines(&self) -> Vec<&'a str> {
        (0..self.len()).filter_map(|i| self.line(i)).collect()
    }
}

fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
