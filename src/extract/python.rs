//! Python segmentation using tree-sitter
//!
//! Extracts:
//! - Module-level functions (sync, async, decorated)
//! - Classes, split into a header chunk and one chunk per method
//! - Import statements

use super::syntax::{
    draft_for, field_text, is_attachment_line, line_span, node_text, outline, parse_source,
    starts_top_level, SourceLines,
};
use super::{
    normalize_drafts, ChunkDraft, ChunkType, Extraction, Language, LanguageProcessor, ParseScope,
};
use crate::error::Result;
use serde_json::json;
use tree_sitter::Node;

/// Leading words that continue a compound statement
const CONTINUATION_KEYWORDS: &[&str] = &["else", "elif", "except", "finally", "case"];

/// Extracts chunks from Python source
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonProcessor;

impl PythonProcessor {
    /// Create a new Python processor
    pub fn new() -> Self {
        Self
    }

    fn visit_top_level(&self, node: Node, source: &str, lines: &SourceLines, drafts: &mut Vec<ChunkDraft>) {
        match node.kind() {
            "function_definition" => drafts.push(self.function_draft(node, node, source, None)),
            "class_definition" => self.class_drafts(node, node, source, lines, drafts),
            "decorated_definition" => {
                let Some(definition) = node.child_by_field_name("definition") else {
                    return;
                };
                match definition.kind() {
                    "function_definition" => {
                        drafts.push(self.function_draft(node, definition, source, None))
                    }
                    "class_definition" => self.class_drafts(node, definition, source, lines, drafts),
                    _ => {}
                }
            }
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                drafts.push(self.import_draft(node, source));
            }
            _ => {}
        }
    }

    /// Draft for a function or method; `outer` includes any decorators
    fn function_draft(&self, outer: Node, definition: Node, source: &str, parent: Option<&str>) -> ChunkDraft {
        let name = field_text(definition, "name", source).unwrap_or("");
        let chunk_type = if parent.is_some() {
            ChunkType::Method
        } else {
            ChunkType::Function
        };

        let mut draft = draft_for(outer, chunk_type, name).with_confidence(0.95);
        draft.insert_meta("is_async", node_text(definition, source).starts_with("async"));

        if let Some(params) = field_text(definition, "parameters", source) {
            draft.insert_meta("parameters", params);
        }
        if let Some(ret) = field_text(definition, "return_type", source) {
            draft.insert_meta("return_type", ret);
        }

        let decorators = decorators(outer, source);
        if !decorators.is_empty() {
            draft.insert_meta("decorators", decorators);
        }
        draft.insert_meta("has_docstring", has_docstring(definition));

        if let Some(parent) = parent {
            draft.insert_meta("parent", parent);
        }

        draft
    }

    fn class_drafts(
        &self,
        outer: Node,
        definition: Node,
        source: &str,
        lines: &SourceLines,
        drafts: &mut Vec<ChunkDraft>,
    ) {
        let name = field_text(definition, "name", source).unwrap_or("");

        // Methods become their own chunks
        let mut members = Vec::new();
        if let Some(body) = definition.child_by_field_name("body") {
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                match child.kind() {
                    "function_definition" => members.push((child, child)),
                    "decorated_definition" => {
                        if let Some(def) = child.child_by_field_name("definition") {
                            if def.kind() == "function_definition" {
                                members.push((child, def));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let (start, end) = line_span(outer);
        let first_member = members.first().map(|(outer, _)| line_span(*outer).0);

        if let Some((header_start, header_end)) = lines.header_span(start, end, first_member) {
            let mut header = ChunkDraft::new(ChunkType::Class, name, header_start, header_end)
                .with_confidence(0.95);
            header.has_errors = definition.has_error();
            if let Some(bases) = field_text(definition, "superclasses", source) {
                header.insert_meta("bases", bases);
            }
            let decorators = decorators(outer, source);
            if !decorators.is_empty() {
                header.insert_meta("decorators", decorators);
            }
            header.insert_meta("method_count", members.len());
            header.insert_meta("has_docstring", has_docstring(definition));
            drafts.push(header);
        }

        for (member_outer, member_def) in members {
            drafts.push(self.function_draft(member_outer, member_def, source, Some(name)));
        }
    }

    fn import_draft(&self, node: Node, source: &str) -> ChunkDraft {
        let module = field_text(node, "module_name", source).unwrap_or("");

        let mut names = Vec::new();
        let mut cursor = node.walk();
        for child in node.children_by_field_name("name", &mut cursor) {
            let imported = match child.kind() {
                "aliased_import" => field_text(child, "name", source).unwrap_or(""),
                _ => node_text(child, source),
            };
            names.push(imported.to_string());
        }
        let mut cursor = node.walk();
        if node
            .children(&mut cursor)
            .any(|child| child.kind() == "wildcard_import")
        {
            names.push("*".to_string());
        }

        let chunk_name = if module.is_empty() {
            names.join(", ")
        } else {
            module.to_string()
        };

        let mut draft = draft_for(node, ChunkType::Import, &chunk_name);
        draft.insert_meta("module", module);
        draft.insert_meta("names", json!(names));
        draft
    }
}

impl LanguageProcessor for PythonProcessor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn process(&self, text: &str, scope: ParseScope) -> Result<Extraction> {
        let (tree, recovered) = parse_source(Language::Python, text, scope)?;
        let lines = SourceLines::new(text);
        let root = tree.root_node();

        let mut drafts = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            self.visit_top_level(child, text, &lines, &mut drafts);
        }

        Ok(Extraction {
            drafts: normalize_drafts(drafts),
            recovered,
            outline: outline(root),
        })
    }

    fn is_window_boundary(&self, previous: Option<&str>, line: &str) -> bool {
        starts_top_level(line, CONTINUATION_KEYWORDS)
            && !previous.is_some_and(|p| is_attachment_line(p) || p.trim_end().ends_with('\\'))
    }
}

fn decorators(outer: Node, source: &str) -> Vec<String> {
    if outer.kind() != "decorated_definition" {
        return Vec::new();
    }
    let mut cursor = outer.walk();
    outer
        .children(&mut cursor)
        .filter(|child| child.kind() == "decorator")
        .map(|child| node_text(child, source).trim_start_matches('@').trim().to_string())
        .collect()
}

fn has_docstring(definition: Node) -> bool {
    let Some(body) = definition.child_by_field_name("body") else {
        return false;
    };
    let mut cursor = body.walk();
    let first = body.named_children(&mut cursor).next();
    first.is_some_and(|statement| {
        statement.kind() == "expression_statement"
            && statement
                .named_child(0)
                .is_some_and(|expr| expr.kind() == "string")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(code: &str) -> Vec<ChunkDraft> {
        PythonProcessor::new()
            .process(code, ParseScope::File)
            .unwrap()
            .drafts
    }

    #[test]
    fn test_extract_functions() {
        let code = r#"
def simple_function():
    pass

def function_with_args(arg1, arg2):
    return arg1 + arg2

async def async_function():
    await something()
"#;
        let drafts = extract(code);
        assert_eq!(drafts.len(), 3);
        assert!(drafts.iter().all(|d| d.chunk_type == ChunkType::Function));
        assert_eq!(drafts[0].name, "simple_function");
        assert_eq!((drafts[0].start_line, drafts[0].end_line), (2, 3));
        assert_eq!(drafts[2].metadata["is_async"], json!(true));
    }

    #[test]
    fn test_class_splits_into_header_and_methods() {
        let code = r#"class MyClass(Base):
    """Docs."""
    limit = 3

    def method1(self):
        pass

    @staticmethod
    def helper():
        pass
"#;
        let drafts = extract(code);
        let kinds: Vec<_> = drafts.iter().map(|d| (d.chunk_type, d.name.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (ChunkType::Class, "MyClass"),
                (ChunkType::Method, "method1"),
                (ChunkType::Method, "helper"),
            ]
        );
        assert_eq!((drafts[0].start_line, drafts[0].end_line), (1, 3));
        assert_eq!(drafts[0].metadata["has_docstring"], json!(true));
        assert_eq!(drafts[1].metadata["parent"], json!("MyClass"));
        assert_eq!(drafts[2].start_line, 8);
        assert_eq!(drafts[2].metadata["decorators"], json!(["staticmethod"]));
    }

    #[test]
    fn test_nested_definitions_fold_into_outer_function() {
        let code = r#"
def outer_function():
    def inner_function():
        pass
    return inner_function
"#;
        let drafts = extract(code);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].name, "outer_function");
        assert_eq!(drafts[0].end_line, 5);
    }

    #[test]
    fn test_extract_imports() {
        let code = r#"
import os
from pathlib import Path
from typing import List, Dict
import numpy as np
"#;
        let drafts = extract(code);
        assert_eq!(drafts.len(), 4);
        assert!(drafts.iter().all(|d| d.chunk_type == ChunkType::Import));
        assert_eq!(drafts[0].name, "os");
        assert_eq!(drafts[0].metadata["module"], json!(""));
        assert_eq!(drafts[2].name, "typing");
        assert_eq!(drafts[2].metadata["names"], json!(["List", "Dict"]));
        assert_eq!(drafts[3].metadata["names"], json!(["numpy"]));
    }

    #[test]
    fn test_decorated_function_span_includes_decorators() {
        let code = "@decorator1\n@decorator2(param=True)\ndef decorated():\n    pass\n";
        let drafts = extract(code);
        assert_eq!(drafts.len(), 1);
        assert_eq!((drafts[0].start_line, drafts[0].end_line), (1, 4));
    }

    #[test]
    fn test_window_boundaries() {
        let processor = PythonProcessor::new();
        assert!(processor.is_window_boundary(None, "def f():"));
        assert!(processor.is_window_boundary(Some("x = 1"), "class A:"));
        assert!(!processor.is_window_boundary(Some("@decorator"), "def f():"));
        assert!(!processor.is_window_boundary(Some("def f():"), "    pass"));
        assert!(!processor.is_window_boundary(Some("    pass"), "else:"));
    }
}
