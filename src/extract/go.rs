//! Go segmentation using tree-sitter
//!
//! Extracts:
//! - Functions, with goroutine, channel and mutex usage
//! - Methods, tagged with their receiver type
//! - Struct types (as classes), interfaces (as traits) and other named types
//! - Import declarations

use super::syntax::{
    draft_for, field_text, node_text, outline, parse_source, signature, starts_top_level, visit,
};
use super::{
    normalize_drafts, ChunkDraft, ChunkType, Extraction, Language, LanguageProcessor, ParseScope,
};
use crate::error::Result;
use serde_json::json;
use tree_sitter::Node;

/// Leading words that continue a statement started on an earlier line
const CONTINUATION_KEYWORDS: &[&str] = &["else", "case", "default"];

/// Extracts chunks from Go source
#[derive(Debug, Clone, Copy, Default)]
pub struct GoProcessor;

impl GoProcessor {
    /// Create a new Go processor
    pub fn new() -> Self {
        Self
    }

    fn visit_declaration(&self, node: Node, source: &str, drafts: &mut Vec<ChunkDraft>) {
        match node.kind() {
            "function_declaration" => drafts.push(self.function_draft(node, source, None)),
            "method_declaration" => {
                let receiver = Receiver::of(node, source);
                let mut draft = self.function_draft(node, source, Some(receiver.type_name.as_str()));
                draft.insert_meta("receiver", receiver.text);
                draft.insert_meta("pointer_receiver", receiver.pointer);
                drafts.push(draft);
            }
            "type_declaration" => self.type_drafts(node, source, drafts),
            "import_declaration" => drafts.push(self.import_draft(node, source)),
            _ => {}
        }
    }

    /// Draft for a function or, given its receiver type, a method
    fn function_draft(&self, node: Node, source: &str, parent: Option<&str>) -> ChunkDraft {
        let name = field_text(node, "name", source).unwrap_or("");
        let chunk_type = if parent.is_some() {
            ChunkType::Method
        } else {
            ChunkType::Function
        };

        let mut draft = draft_for(node, chunk_type, name).with_confidence(0.95);
        draft.insert_meta("is_exported", is_exported(name));
        draft.insert_meta("signature", signature(node, source));
        if let Some(parent) = parent {
            draft.insert_meta("parent", parent);
        }

        if let Some(body) = node.child_by_field_name("body") {
            let usage = Concurrency::scan(body, source);
            if usage.any() {
                draft.insert_meta(
                    "concurrency",
                    json!({
                        "goroutines": usage.goroutines,
                        "channel_ops": usage.channel_ops,
                        "mutex": usage.mutex,
                    }),
                );
            }
        }
        draft
    }

    fn type_drafts(&self, node: Node, source: &str, drafts: &mut Vec<ChunkDraft>) {
        let mut cursor = node.walk();
        let specs: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|child| matches!(child.kind(), "type_spec" | "type_alias"))
            .collect();

        // A lone spec keeps the `type` keyword line; grouped specs get their own spans
        let single = specs.len() == 1;
        for spec in specs {
            let outer = if single { node } else { spec };
            drafts.push(self.type_draft(outer, spec, source));
        }
    }

    fn type_draft(&self, outer: Node, spec: Node, source: &str) -> ChunkDraft {
        let name = field_text(spec, "name", source).unwrap_or("");
        let body = spec.child_by_field_name("type");
        let (chunk_type, go_type) = match (spec.kind(), body.map(|b| b.kind())) {
            ("type_alias", _) => (ChunkType::Other, "alias"),
            (_, Some("struct_type")) => (ChunkType::Class, "struct"),
            (_, Some("interface_type")) => (ChunkType::Trait, "interface"),
            _ => (ChunkType::Other, "type"),
        };
        let confidence = if chunk_type == ChunkType::Other { 0.8 } else { 0.95 };

        let mut draft = draft_for(outer, chunk_type, name).with_confidence(confidence);
        draft.insert_meta("go_type", go_type);
        draft.insert_meta("is_exported", is_exported(name));

        let Some(body) = body else {
            return draft;
        };
        match go_type {
            "struct" => {
                let mut fields = 0;
                let (mut has_mutex, mut has_waitgroup, mut has_channel) = (false, false, false);
                visit(body, &mut |n| match n.kind() {
                    "field_declaration" => {
                        fields += 1;
                        let field_type = field_text(n, "type", source).unwrap_or("");
                        has_mutex |= field_type.ends_with("Mutex");
                        has_waitgroup |= field_type.ends_with("WaitGroup");
                    }
                    "channel_type" => has_channel = true,
                    _ => {}
                });
                draft.insert_meta("field_count", fields);
                draft.insert_meta("has_mutex", has_mutex);
                draft.insert_meta("has_waitgroup", has_waitgroup);
                draft.insert_meta("has_channel", has_channel);
            }
            "interface" => {
                let mut cursor = body.walk();
                let methods = body
                    .named_children(&mut cursor)
                    .filter(|child| matches!(child.kind(), "method_elem" | "method_spec"))
                    .count();
                draft.insert_meta("method_count", methods);
            }
            _ => {}
        }
        draft
    }

    fn import_draft(&self, node: Node, source: &str) -> ChunkDraft {
        let mut paths = Vec::new();
        visit(node, &mut |n| {
            if n.kind() == "import_spec" {
                if let Some(path) = field_text(n, "path", source) {
                    paths.push(path.trim_matches(|c| c == '"' || c == '`').to_string());
                }
            }
        });

        let mut draft = draft_for(node, ChunkType::Import, &paths.join(", "));
        draft.insert_meta("names", json!(paths));
        draft
    }
}

impl LanguageProcessor for GoProcessor {
    fn language(&self) -> Language {
        Language::Go
    }

    fn process(&self, text: &str, scope: ParseScope) -> Result<Extraction> {
        let (tree, recovered) = parse_source(Language::Go, text, scope)?;
        let root = tree.root_node();

        let mut drafts = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            self.visit_declaration(child, text, &mut drafts);
        }

        Ok(Extraction {
            drafts: normalize_drafts(drafts),
            recovered,
            outline: outline(root),
        })
    }

    fn is_window_boundary(&self, previous: Option<&str>, line: &str) -> bool {
        starts_top_level(line, CONTINUATION_KEYWORDS)
            && !previous.is_some_and(|p| p.trim_end().ends_with(','))
    }
}

/// Exported identifiers start with an upper-case letter
fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

/// The receiver of a method declaration
struct Receiver {
    /// Receiver type without pointer or type arguments
    type_name: String,
    /// Source text of the receiver list
    text: String,
    pointer: bool,
}

impl Receiver {
    fn of(method: Node, source: &str) -> Self {
        let list = method.child_by_field_name("receiver");
        let text = list.map(|l| node_text(l, source)).unwrap_or("").to_string();

        let receiver_type = list.and_then(|l| {
            let mut cursor = l.walk();
            let declaration = l
                .named_children(&mut cursor)
                .find(|child| child.kind() == "parameter_declaration");
            declaration.and_then(|d| field_text(d, "type", source))
        });

        let Some(receiver_type) = receiver_type else {
            return Self {
                type_name: "Unknown".to_string(),
                text,
                pointer: false,
            };
        };

        let bare = receiver_type.trim_start_matches('*').trim();
        let type_name = bare.split('[').next().unwrap_or(bare).trim().to_string();
        Self {
            type_name,
            text,
            pointer: receiver_type.starts_with('*'),
        }
    }
}

/// Goroutine, channel and lock usage inside a function body
#[derive(Debug, Default)]
struct Concurrency {
    goroutines: usize,
    channel_ops: usize,
    mutex: bool,
}

impl Concurrency {
    fn scan(body: Node, source: &str) -> Self {
        let mut usage = Self::default();
        visit(body, &mut |n| match n.kind() {
            "go_statement" => usage.goroutines += 1,
            "send_statement" => usage.channel_ops += 1,
            "unary_expression" if field_text(n, "operator", source) == Some("<-") => {
                usage.channel_ops += 1
            }
            "selector_expression" => {
                if matches!(
                    field_text(n, "field", source),
                    Some("Lock" | "Unlock" | "RLock" | "RUnlock")
                ) {
                    usage.mutex = true;
                }
            }
            _ => {}
        });
        usage
    }

    fn any(&self) -> bool {
        self.goroutines > 0 || self.channel_ops > 0 || self.mutex
    }
}
