//! Rust segmentation using tree-sitter
//!
//! Extracts:
//! - Function definitions with visibility and signature
//! - Structs, enums and unions (as classes)
//! - Traits, and impl blocks split into a header and their methods
//! - `use` and `extern crate` declarations
//! - Inline modules and `macro_rules!` definitions

use super::syntax::{
    draft_for, field_text, is_attachment_line, line_span, node_text, outline, parse_source,
    signature, starts_top_level, SourceLines,
};
use super::{
    normalize_drafts, ChunkDraft, ChunkType, Extraction, Language, LanguageProcessor, ParseScope,
};
use crate::error::Result;
use tree_sitter::Node;

/// Leading words that continue an item started on an earlier line
const CONTINUATION_KEYWORDS: &[&str] = &["where", "else"];

/// Extracts chunks from Rust source
#[derive(Debug, Clone, Copy, Default)]
pub struct RustProcessor;

impl RustProcessor {
    /// Create a new Rust processor
    pub fn new() -> Self {
        Self
    }

    fn visit_item(&self, node: Node, source: &str, lines: &SourceLines, drafts: &mut Vec<ChunkDraft>) {
        match node.kind() {
            "function_item" => drafts.push(self.function_draft(node, source, None)),
            "struct_item" => drafts.push(self.type_draft(node, source, "struct")),
            "enum_item" => drafts.push(self.type_draft(node, source, "enum")),
            "union_item" => drafts.push(self.type_draft(node, source, "union")),
            "trait_item" => {
                let name = field_text(node, "name", source).unwrap_or("");
                let mut draft = draft_for(node, ChunkType::Trait, name).with_confidence(0.95);
                draft.insert_meta("is_public", has_visibility(node, source));
                drafts.push(draft);
            }
            "impl_item" => self.impl_drafts(node, source, lines, drafts),
            "use_declaration" => {
                let path = field_text(node, "argument", source).unwrap_or("");
                let mut draft = draft_for(node, ChunkType::Import, path);
                draft.insert_meta("is_public", has_visibility(node, source));
                drafts.push(draft);
            }
            "extern_crate_declaration" => {
                let name = field_text(node, "name", source).unwrap_or("");
                drafts.push(draft_for(node, ChunkType::Import, name));
            }
            "mod_item" if node.child_by_field_name("body").is_some() => {
                let name = field_text(node, "name", source).unwrap_or("");
                let mut draft = draft_for(node, ChunkType::Other, name).with_confidence(0.8);
                draft.insert_meta("kind", "module");
                drafts.push(draft);
            }
            "macro_definition" => {
                let name = field_text(node, "name", source).unwrap_or("");
                let mut draft = draft_for(node, ChunkType::Other, name).with_confidence(0.8);
                draft.insert_meta("kind", "macro");
                drafts.push(draft);
            }
            _ => {}
        }
    }

    /// Draft for a free function or an impl method
    fn function_draft(&self, node: Node, source: &str, parent: Option<&str>) -> ChunkDraft {
        let name = field_text(node, "name", source).unwrap_or("");
        let chunk_type = if parent.is_some() {
            ChunkType::Method
        } else {
            ChunkType::Function
        };

        let mut draft = draft_for(node, chunk_type, name).with_confidence(0.95);
        draft.insert_meta("is_public", has_visibility(node, source));
        draft.insert_meta("signature", signature(node, source));

        let mut cursor = node.walk();
        if let Some(modifiers) = node
            .children(&mut cursor)
            .find(|child| child.kind() == "function_modifiers")
        {
            let text = node_text(modifiers, source);
            draft.insert_meta("is_async", text.contains("async"));
            draft.insert_meta("is_unsafe", text.contains("unsafe"));
        }

        if let Some(parent) = parent {
            draft.insert_meta("parent", parent);
        }
        draft
    }

    fn type_draft(&self, node: Node, source: &str, kind: &str) -> ChunkDraft {
        let name = field_text(node, "name", source).unwrap_or("");
        let mut draft = draft_for(node, ChunkType::Class, name).with_confidence(0.95);
        draft.insert_meta("kind", kind);
        draft.insert_meta("is_public", has_visibility(node, source));
        draft
    }

    fn impl_drafts(&self, node: Node, source: &str, lines: &SourceLines, drafts: &mut Vec<ChunkDraft>) {
        // Get the type being implemented
        let type_name = field_text(node, "type", source).unwrap_or("Unknown");
        let trait_name = field_text(node, "trait", source);

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for item in body.children(&mut cursor) {
                if item.kind() == "function_item" {
                    methods.push(item);
                }
            }
        }

        let (start, end) = line_span(node);
        let first_method = methods.first().map(|m| line_span(*m).0);

        if let Some((header_start, header_end)) = lines.header_span(start, end, first_method) {
            let name = match trait_name {
                Some(trait_name) => format!("{} for {}", trait_name, type_name),
                None => type_name.to_string(),
            };
            let mut header =
                ChunkDraft::new(ChunkType::Impl, name, header_start, header_end).with_confidence(0.9);
            header.has_errors = node.has_error();
            header.insert_meta("impl_type", type_name);
            if let Some(trait_name) = trait_name {
                header.insert_meta("trait", trait_name);
            }
            header.insert_meta("method_count", methods.len());
            drafts.push(header);
        }

        for method in methods {
            drafts.push(self.function_draft(method, source, Some(type_name)));
        }
    }
}

impl LanguageProcessor for RustProcessor {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn process(&self, text: &str, scope: ParseScope) -> Result<Extraction> {
        let (tree, recovered) = parse_source(Language::Rust, text, scope)?;
        let lines = SourceLines::new(text);
        let root = tree.root_node();

        let mut drafts = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            self.visit_item(child, text, &lines, &mut drafts);
        }

        Ok(Extraction {
            drafts: normalize_drafts(drafts),
            recovered,
            outline: outline(root),
        })
    }

    fn is_window_boundary(&self, previous: Option<&str>, line: &str) -> bool {
        starts_top_level(line, CONTINUATION_KEYWORDS) && !previous.is_some_and(is_attachment_line)
    }
}

/// Check if a Rust node has pub visibility
fn has_visibility(node: Node, source: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| {
        child.kind() == "visibility_modifier" && node_text(child, source).starts_with("pub")
    });
    found
}
