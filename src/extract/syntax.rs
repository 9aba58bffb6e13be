//! Tree-sitter helpers shared by the language processors

use super::{ChunkDraft, ChunkType, Language, ParseScope};
use crate::error::{ChunkError, Result};
use tree_sitter::{Node, Parser, Tree};

/// Parse `text`, enforcing the error policy of `scope`
///
/// Returns the tree and whether error recovery was needed.
pub(crate) fn parse_source(language: Language, text: &str, scope: ParseScope) -> Result<(Tree, bool)> {
    if text.contains('\0') {
        return Err(ChunkError::malformed(language, "input contains NUL bytes"));
    }

    let mut parser = Parser::new();
    parser
        .set_language(&language.tree_sitter_language())
        .map_err(|e| ChunkError::malformed(language, format!("grammar rejected: {}", e)))?;

    let tree = parser
        .parse(text, None)
        .ok_or_else(|| ChunkError::malformed(language, "parser produced no tree"))?;

    let recovered = tree.root_node().has_error();
    if recovered && scope == ParseScope::Window {
        return Err(ChunkError::malformed(language, "syntax errors in reparse window"));
    }

    Ok((tree, recovered))
}

/// Source text of a node
pub(crate) fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Source text of a named field
pub(crate) fn field_text<'a>(node: Node, field: &str, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field).map(|n| node_text(n, source))
}

/// 1-indexed inclusive line span of a node
pub(crate) fn line_span(node: Node) -> (usize, usize) {
    let start = node.start_position().row + 1;
    let end_position = node.end_position();
    let end = if end_position.column == 0 && end_position.row + 1 > start {
        end_position.row
    } else {
        end_position.row + 1
    };
    (start, end.max(start))
}

/// Line spans of the root's children, in source order
pub(crate) fn outline(root: Node) -> Vec<(usize, usize)> {
    let mut cursor = root.walk();
    let spans = root.children(&mut cursor).map(line_span).collect();
    spans
}

/// Everything in a function node up to its body block
pub(crate) fn signature(node: Node, source: &str) -> String {
    let signature_end = node
        .child_by_field_name("body")
        .map_or(node.end_byte(), |body| body.start_byte());

    source
        .get(node.start_byte()..signature_end)
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Build a draft covering `node`
pub(crate) fn draft_for(node: Node, chunk_type: ChunkType, name: &str) -> ChunkDraft {
    let (start, end) = line_span(node);
    let mut draft = ChunkDraft::new(chunk_type, name, start, end);
    draft.has_errors = node.has_error();
    draft
}

/// Whether any node in the subtree satisfies `predicate`
pub(crate) fn any_descendant(node: Node, predicate: &dyn Fn(Node) -> bool) -> bool {
    if predicate(node) {
        return true;
    }
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| any_descendant(child, predicate));
    found
}

/// Visit every node in the subtree
pub(crate) fn visit(node: Node, visitor: &mut dyn FnMut(Node)) {
    visitor(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, visitor);
    }
}

/// Line access over the processed text
pub(crate) struct SourceLines<'a> {
    lines: Vec<&'a str>,
}

impl<'a> SourceLines<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
        }
    }

    /// Whether the 1-indexed line is empty or whitespace
    pub(crate) fn is_blank(&self, line: usize) -> bool {
        line == 0
            || self
                .lines
                .get(line - 1)
                .map_or(true, |l| l.trim().is_empty())
    }

    /// Span of a container's header: from `start` up to the line before
    /// its first member, trailing blank lines trimmed
    pub(crate) fn header_span(
        &self,
        start: usize,
        end: usize,
        first_member: Option<usize>,
    ) -> Option<(usize, usize)> {
        let Some(member_start) = first_member else {
            return Some((start, end));
        };
        if member_start <= start {
            return None;
        }
        let mut header_end = member_start - 1;
        while header_end > start && self.is_blank(header_end) {
            header_end -= 1;
        }
        Some((start, header_end))
    }
}

/// Whether `line` begins a top-level construct
///
/// `keywords` lists leading words that continue a previous statement.
pub(crate) fn starts_top_level(line: &str, keywords: &[&str]) -> bool {
    let Some(first) = line.chars().next() else {
        return false;
    };
    if first.is_whitespace() {
        return false;
    }
    if matches!(
        first,
        '}' | ')' | ']' | '{' | '.' | ',' | ';' | '?' | ':' | '|' | '&' | '+' | '-' | '*' | '='
            | '<' | '>' | '%' | '^'
    ) {
        return false;
    }

    let word: String = line
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    !keywords.contains(&word.as_str())
}

/// Decorators and attributes bind to the line that follows them
pub(crate) fn is_attachment_line(line: &str) -> bool {
    line.starts_with('@') || line.starts_with("#[")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_top_level() {
        assert!(starts_top_level("def f():", &[]));
        assert!(starts_top_level("// comment", &[]));
        assert!(!starts_top_level("    return 1", &[]));
        assert!(!starts_top_level("}", &[]));
        assert!(!starts_top_level("", &[]));
        assert!(!starts_top_level("else:", &["else"]));
        assert!(starts_top_level("elsewhere = 1", &["else"]));
    }

    #[test]
    fn test_header_span_trims_blank_lines() {
        let text = "class A:\n    x = 1\n\n    def m(self):\n        pass\n";
        let lines = SourceLines::new(text);
        assert_eq!(lines.header_span(1, 5, Some(4)), Some((1, 2)));
        assert_eq!(lines.header_span(1, 5, None), Some((1, 5)));
        assert_eq!(lines.header_span(4, 5, Some(4)), None);
    }

    #[test]
    fn test_window_parse_rejects_errors() {
        let result = parse_source(Language::Python, "def broken(:\n", ParseScope::Window);
        assert!(matches!(result, Err(ChunkError::MalformedInput { .. })));

        let (_, recovered) =
            parse_source(Language::Python, "def broken(:\n", ParseScope::File).unwrap();
        assert!(recovered);
    }

    #[test]
    fn test_nul_bytes_are_malformed() {
        assert!(parse_source(Language::Rust, "fn a() {}\0", ParseScope::File).is_err());
    }
}
