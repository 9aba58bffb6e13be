//! JavaScript and TypeScript segmentation using tree-sitter
//!
//! One processor serves JavaScript, TypeScript and TSX; only the grammar
//! differs. React constructs are recognised from local evidence only:
//! hook naming, JSX in the body, `createContext`, `memo` and `forwardRef`.

use super::syntax::{
    any_descendant, draft_for, field_text, is_attachment_line, line_span, node_text, outline,
    parse_source, starts_top_level, visit, SourceLines,
};
use super::{
    normalize_drafts, ChunkDraft, ChunkType, Extraction, Language, LanguageProcessor, ParseScope,
};
use crate::error::Result;
use serde_json::json;
use std::collections::BTreeSet;
use tree_sitter::Node;

/// Leading words that continue a statement started on an earlier line
const CONTINUATION_KEYWORDS: &[&str] = &["else", "catch", "finally", "extends", "implements"];

/// How a callable was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallableForm {
    Declaration,
    Arrow,
    Expression,
}

impl CallableForm {
    fn component_type(&self) -> &'static str {
        match self {
            CallableForm::Declaration | CallableForm::Expression => "function",
            CallableForm::Arrow => "arrow",
        }
    }
}

/// Export status of the statement being visited
#[derive(Debug, Clone, Copy)]
struct ExportInfo {
    is_default: bool,
}

/// Extracts chunks from JavaScript, TypeScript and TSX source
#[derive(Debug, Clone, Copy)]
pub struct ScriptProcessor {
    language: Language,
}

impl ScriptProcessor {
    /// Create a processor for one of the script languages
    pub fn new(language: Language) -> Self {
        debug_assert!(matches!(
            language,
            Language::JavaScript | Language::TypeScript | Language::Tsx
        ));
        Self { language }
    }

    fn visit_statement(&self, node: Node, source: &str, lines: &SourceLines, drafts: &mut Vec<ChunkDraft>) {
        match node.kind() {
            "export_statement" => self.visit_export(node, source, lines, drafts),
            "import_statement" => drafts.push(self.import_draft(node, source)),
            _ => self.visit_declaration(node, node, source, lines, drafts, None),
        }
    }

    fn visit_export(&self, node: Node, source: &str, lines: &SourceLines, drafts: &mut Vec<ChunkDraft>) {
        let mut cursor = node.walk();
        let is_default = node.children(&mut cursor).any(|c| c.kind() == "default");
        let export = ExportInfo { is_default };

        if let Some(declaration) = node.child_by_field_name("declaration") {
            self.visit_declaration(declaration, node, source, lines, drafts, Some(export));
            return;
        }

        if let Some(value) = node.child_by_field_name("value") {
            match value.kind() {
                "arrow_function" | "function_expression" | "function" | "generator_function" => {
                    let name = field_text(value, "name", source).unwrap_or("default");
                    let form = if value.kind() == "arrow_function" {
                        CallableForm::Arrow
                    } else {
                        CallableForm::Expression
                    };
                    let mut draft = self.callable_draft(node, value, name, form, source);
                    mark_export(&mut draft, export);
                    drafts.push(draft);
                }
                "class" => {
                    let name = field_text(value, "name", source).unwrap_or("default");
                    let before = drafts.len();
                    self.class_drafts(node, value, name, source, lines, drafts);
                    if let Some(header) = drafts.get_mut(before) {
                        mark_export(header, export);
                    }
                }
                _ => {
                    let mut draft = draft_for(node, ChunkType::Export, node_text(value, source));
                    draft.insert_meta("is_default_export", true);
                    drafts.push(draft);
                }
            }
            return;
        }

        // export { a, b } [from "module"]
        let mut names = Vec::new();
        visit(node, &mut |n| {
            if n.kind() == "export_specifier" {
                if let Some(name) = field_text(n, "name", source) {
                    names.push(name.to_string());
                }
            }
        });
        let mut draft = draft_for(node, ChunkType::Export, &names.join(", "));
        draft.insert_meta("names", json!(names));
        if let Some(module) = field_text(node, "source", source) {
            draft.insert_meta("source", unquote(module));
        }
        drafts.push(draft);
    }

    /// Visit a declaration whose chunk spans `outer`
    fn visit_declaration(
        &self,
        declaration: Node,
        outer: Node,
        source: &str,
        lines: &SourceLines,
        drafts: &mut Vec<ChunkDraft>,
        export: Option<ExportInfo>,
    ) {
        let before = drafts.len();

        match declaration.kind() {
            "function_declaration" | "generator_function_declaration" => {
                let name = field_text(declaration, "name", source).unwrap_or("");
                drafts.push(self.callable_draft(
                    outer,
                    declaration,
                    name,
                    CallableForm::Declaration,
                    source,
                ));
            }
            "class_declaration" | "abstract_class_declaration" => {
                let name = field_text(declaration, "name", source).unwrap_or("");
                self.class_drafts(outer, declaration, name, source, lines, drafts);
            }
            "lexical_declaration" | "variable_declaration" => {
                self.binding_drafts(declaration, outer, source, lines, drafts, export.is_some());
            }
            "interface_declaration" => drafts.push(self.type_draft(outer, declaration, "interface", source)),
            "type_alias_declaration" => drafts.push(self.type_draft(outer, declaration, "type", source)),
            "enum_declaration" => drafts.push(self.type_draft(outer, declaration, "enum", source)),
            "internal_module" | "module" => {
                drafts.push(self.type_draft(outer, declaration, "namespace", source))
            }
            _ => {}
        }

        if let (Some(export), Some(primary)) = (export, drafts.get_mut(before)) {
            mark_export(primary, export);
        }
    }

    /// `const name = <value>` style bindings
    fn binding_drafts(
        &self,
        declaration: Node,
        outer: Node,
        source: &str,
        lines: &SourceLines,
        drafts: &mut Vec<ChunkDraft>,
        exported: bool,
    ) {
        let mut cursor = declaration.walk();
        let declarators: Vec<Node> = declaration
            .named_children(&mut cursor)
            .filter(|n| n.kind() == "variable_declarator")
            .collect();

        // Several bindings in one statement only matter as an export
        if declarators.len() != 1 {
            if exported {
                let names: Vec<&str> = declarators
                    .iter()
                    .filter_map(|d| field_text(*d, "name", source))
                    .collect();
                drafts.push(draft_for(outer, ChunkType::Export, &names.join(", ")));
            }
            return;
        }

        let declarator = declarators[0];
        let name = field_text(declarator, "name", source).unwrap_or("");
        let annotation = field_text(declarator, "type", source)
            .map(|t| t.trim_start_matches(':').trim())
            .unwrap_or("");

        let Some(value) = declarator.child_by_field_name("value") else {
            if exported {
                drafts.push(draft_for(outer, ChunkType::Export, name));
            }
            return;
        };

        match value.kind() {
            "arrow_function" | "function_expression" | "function" | "generator_function" => {
                let form = if value.kind() == "arrow_function" {
                    CallableForm::Arrow
                } else {
                    CallableForm::Expression
                };
                let mut draft = self.callable_draft(outer, value, name, form, source);
                if is_component_name(name) && is_fc_annotation(annotation) {
                    draft.chunk_type = ChunkType::Component;
                    draft.insert_meta("component_type", "fc");
                    if let Some(props) = generic_argument(annotation) {
                        draft.insert_meta("props_type", props);
                    }
                }
                drafts.push(draft);
            }
            "call_expression" => {
                if let Some(draft) = self.call_binding_draft(outer, value, name, source) {
                    drafts.push(draft);
                } else if exported {
                    drafts.push(draft_for(outer, ChunkType::Export, name));
                }
            }
            "class" => self.class_drafts(outer, value, name, source, lines, drafts),
            _ => {
                if exported {
                    drafts.push(draft_for(outer, ChunkType::Export, name));
                }
            }
        }
    }

    /// Bindings produced by React factory calls
    fn call_binding_draft(&self, outer: Node, call: Node, name: &str, source: &str) -> Option<ChunkDraft> {
        let callee = field_text(call, "function", source)?;

        if callee.ends_with("createContext") {
            let mut draft = draft_for(outer, ChunkType::Context, name).with_confidence(0.9);
            if let Some(args) = type_arguments(call, source) {
                draft.insert_meta("context_type", args);
            }
            return Some(draft);
        }

        let component_type = if callee.ends_with("memo") {
            "memo"
        } else if callee.ends_with("forwardRef") {
            "forward_ref"
        } else {
            return None;
        };

        let mut draft = draft_for(outer, ChunkType::Component, name).with_confidence(0.85);
        draft.insert_meta("component_type", component_type);
        draft.insert_meta("has_jsx", contains_jsx(call));
        let hooks = hooks_used(call, source);
        if !hooks.is_empty() {
            draft.insert_meta("hooks_used", json!(hooks));
        }
        Some(draft)
    }

    /// Functions, hooks and function components
    fn callable_draft(&self, outer: Node, callable: Node, name: &str, form: CallableForm, source: &str) -> ChunkDraft {
        let has_jsx = contains_jsx(callable);
        let hooks = hooks_used(callable, source);

        let mut draft = if is_hook_name(name) {
            draft_for(outer, ChunkType::Hook, name).with_confidence(0.9)
        } else if is_component_name(name) && has_jsx {
            let mut draft = draft_for(outer, ChunkType::Component, name).with_confidence(0.9);
            draft.insert_meta("component_type", form.component_type());
            if let Some(props) = first_parameter_type(callable, source) {
                draft.insert_meta("props_type", props);
            }
            draft
        } else {
            let mut draft = draft_for(outer, ChunkType::Function, name).with_confidence(0.95);
            if name.starts_with("with") && name[4..].starts_with(char::is_uppercase) {
                draft.insert_meta("is_hoc", true);
            }
            draft
        };

        draft.insert_meta("is_async", node_text(callable, source).starts_with("async"));
        if draft.chunk_type != ChunkType::Function {
            draft.insert_meta("has_jsx", has_jsx);
        }
        if !hooks.is_empty() {
            draft.insert_meta("hooks_used", json!(hooks));
        }
        draft
    }

    fn class_drafts(
        &self,
        outer: Node,
        class: Node,
        name: &str,
        source: &str,
        lines: &SourceLines,
        drafts: &mut Vec<ChunkDraft>,
    ) {
        let mut methods = Vec::new();
        if let Some(body) = class.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.named_children(&mut cursor) {
                if member.kind() == "method_definition" {
                    methods.push(member);
                }
            }
        }

        let mut cursor = class.walk();
        let heritage = class
            .children(&mut cursor)
            .find(|c| c.kind() == "class_heritage")
            .map(|h| node_text(h, source).to_string());

        let (start, end) = line_span(outer);
        let first_method = methods.first().map(|m| line_span(*m).0);

        if let Some((header_start, header_end)) = lines.header_span(start, end, first_method) {
            let is_component = heritage
                .as_deref()
                .is_some_and(|h| h.contains("Component") || h.contains("PureComponent"));
            let chunk_type = if is_component {
                ChunkType::Component
            } else {
                ChunkType::Class
            };

            let mut header = ChunkDraft::new(chunk_type, name, header_start, header_end)
                .with_confidence(0.95);
            header.has_errors = class.has_error();
            if is_component {
                header.insert_meta("component_type", "class");
            }
            if let Some(heritage) = heritage {
                header.insert_meta("heritage", heritage);
            }
            header.insert_meta("method_count", methods.len());
            drafts.push(header);
        }

        for method in methods {
            let method_name = field_text(method, "name", source).unwrap_or("");
            let text = node_text(method, source);
            let mut draft = draft_for(method, ChunkType::Method, method_name).with_confidence(0.95);
            draft.insert_meta("parent", name);
            draft.insert_meta("is_static", text.starts_with("static"));
            draft.insert_meta("is_async", text.split_whitespace().take(2).any(|w| w == "async"));
            drafts.push(draft);
        }
    }

    fn type_draft(&self, outer: Node, declaration: Node, kind: &str, source: &str) -> ChunkDraft {
        let name = field_text(declaration, "name", source).unwrap_or("");
        let mut draft = draft_for(outer, ChunkType::Other, name).with_confidence(0.9);
        draft.insert_meta("kind", kind);
        draft
    }

    fn import_draft(&self, node: Node, source: &str) -> ChunkDraft {
        let module = field_text(node, "source", source).map(unquote).unwrap_or_default();

        let mut names = Vec::new();
        visit(node, &mut |n| match n.kind() {
            "import_specifier" => {
                if let Some(name) = field_text(n, "name", source) {
                    names.push(name.to_string());
                }
            }
            "import_clause" | "namespace_import" => {
                let mut cursor = n.walk();
                for child in n.named_children(&mut cursor) {
                    if child.kind() == "identifier" {
                        names.push(node_text(child, source).to_string());
                    }
                }
            }
            _ => {}
        });

        let mut draft = draft_for(node, ChunkType::Import, &module);
        draft.insert_meta("module", module.as_str());
        draft.insert_meta("names", json!(names));
        draft
    }
}

impl LanguageProcessor for ScriptProcessor {
    fn language(&self) -> Language {
        self.language
    }

    fn process(&self, text: &str, scope: ParseScope) -> Result<Extraction> {
        let (tree, recovered) = parse_source(self.language, text, scope)?;
        let lines = SourceLines::new(text);
        let root = tree.root_node();

        let mut drafts = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            self.visit_statement(child, text, &lines, &mut drafts);
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

fn mark_export(draft: &mut ChunkDraft, export: ExportInfo) {
    draft.insert_meta("is_export", true);
    draft.insert_meta("is_default_export", export.is_default);
}

fn is_hook_name(name: &str) -> bool {
    name.strip_prefix("use")
        .is_some_and(|rest| rest.starts_with(char::is_uppercase))
}

fn is_component_name(name: &str) -> bool {
    name.starts_with(char::is_uppercase)
}

fn is_fc_annotation(annotation: &str) -> bool {
    let base = annotation.split('<').next().unwrap_or("").trim();
    matches!(
        base,
        "FC" | "React.FC" | "FunctionComponent" | "React.FunctionComponent" | "VFC" | "React.VFC"
    )
}

/// `Foo<Bar>` -> `Bar`
fn generic_argument(annotation: &str) -> Option<String> {
    let start = annotation.find('<')?;
    let end = annotation.rfind('>')?;
    (end > start + 1).then(|| annotation[start + 1..end].trim().to_string())
}

fn contains_jsx(node: Node) -> bool {
    any_descendant(node, &|n| n.kind().starts_with("jsx_"))
}

/// Names of hooks called anywhere in the subtree, sorted
fn hooks_used(node: Node, source: &str) -> Vec<String> {
    let mut hooks = BTreeSet::new();
    visit(node, &mut |n| {
        if n.kind() != "call_expression" {
            return;
        }
        if let Some(callee) = field_text(n, "function", source) {
            let short = callee.rsplit('.').next().unwrap_or(callee);
            if is_hook_name(short) {
                hooks.insert(short.to_string());
            }
        }
    });
    hooks.into_iter().collect()
}

fn type_arguments(call: Node, source: &str) -> Option<String> {
    let mut cursor = call.walk();
    let args = call
        .children(&mut cursor)
        .find(|c| c.kind() == "type_arguments")?;
    let text = node_text(args, source);
    Some(
        text.trim_start_matches('<')
            .trim_end_matches('>')
            .trim()
            .to_string(),
    )
}

/// Type annotation of the first parameter, for props detection
fn first_parameter_type(callable: Node, source: &str) -> Option<String> {
    let params = callable.child_by_field_name("parameters")?;
    let mut cursor = params.walk();
    let first = params.named_children(&mut cursor).next()?;
    let annotation = field_text(first, "type", source)?;
    Some(annotation.trim_start_matches(':').trim().to_string())
}

fn unquote(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(language: Language, code: &str) -> Vec<ChunkDraft> {
        ScriptProcessor::new(language)
            .process(code, ParseScope::File)
            .unwrap()
            .drafts
    }

    fn find<'a>(drafts: &'a [ChunkDraft], name: &str) -> &'a ChunkDraft {
        drafts
            .iter()
            .find(|d| d.name == name)
            .unwrap_or_else(|| panic!("no chunk named {}", name))
    }

    #[test]
    fn test_extract_functions() {
        let code = r#"
function simpleFunction() {
    console.log("Hello");
}

async function asyncFunction() {
    await doSomething();
}

const arrowFunction = () => {
    return "arrow";
};

const asyncArrow = async (param) => {
    return await fetch(param);
};
"#;
        let drafts = extract(Language::JavaScript, code);
        let names: Vec<_> = drafts
            .iter()
            .filter(|d| d.chunk_type == ChunkType::Function)
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["simpleFunction", "asyncFunction", "arrowFunction", "asyncArrow"]
        );
        assert_eq!(find(&drafts, "asyncArrow").metadata["is_async"], json!(true));
        assert_eq!(find(&drafts, "arrowFunction").end_line, 12);
    }

    #[test]
    fn test_class_methods() {
        let code = r#"
class ExtendedClass extends BaseClass {
    constructor() {
        super();
    }

    static create() {
        return new ExtendedClass();
    }
}
"#;
        let drafts = extract(Language::JavaScript, code);
        let kinds: Vec<_> = drafts.iter().map(|d| (d.chunk_type, d.name.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (ChunkType::Class, "ExtendedClass"),
                (ChunkType::Method, "constructor"),
                (ChunkType::Method, "create"),
            ]
        );
        assert_eq!(drafts[0].start_line, 2);
        assert_eq!(drafts[0].end_line, 2);
        assert_eq!(drafts[2].metadata["is_static"], json!(true));
    }

    #[test]
    fn test_imports_and_exports() {
        let code = r#"
import React from 'react';
import { useState, useEffect } from 'react';
import * as utils from './utils';
export const value = 42;
export function exportedFunction() {}
export { namedExport };
"#;
        let drafts = extract(Language::JavaScript, code);
        let imports: Vec<_> = drafts
            .iter()
            .filter(|d| d.chunk_type == ChunkType::Import)
            .collect();
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[0].name, "react");
        assert_eq!(imports[1].metadata["names"], json!(["useState", "useEffect"]));

        assert_eq!(find(&drafts, "value").chunk_type, ChunkType::Export);
        let exported = find(&drafts, "exportedFunction");
        assert_eq!(exported.chunk_type, ChunkType::Function);
        assert_eq!(exported.metadata["is_export"], json!(true));
        assert_eq!(find(&drafts, "namedExport").chunk_type, ChunkType::Export);
    }

    #[test]
    fn test_react_constructs() {
        let code = r#"
import React, { useState, useContext } from 'react';

interface ButtonProps {
  onClick: () => void;
}

function Button({ onClick }: ButtonProps) {
  return <button onClick={onClick}>ok</button>;
}

export const Card: React.FC<{ title: string }> = ({ title }) => (
  <div className="card">{title}</div>
);

const ThemeContext = React.createContext<{ theme: string }>({ theme: 'light' });

function useTheme() {
  const context = useContext(ThemeContext);
  return context;
}

const MemoizedButton = React.memo(({ onClick }: ButtonProps) => {
  return <button onClick={onClick} />;
});

export default function App() {
  const [count, setCount] = useState(0);
  return <Card title="x" />;
}
"#;
        let drafts = extract(Language::Tsx, code);

        let button = find(&drafts, "Button");
        assert_eq!(button.chunk_type, ChunkType::Component);
        assert_eq!(button.metadata["component_type"], json!("function"));
        assert_eq!(button.metadata["props_type"], json!("ButtonProps"));
        assert_eq!(button.metadata["has_jsx"], json!(true));

        let card = find(&drafts, "Card");
        assert_eq!(card.chunk_type, ChunkType::Component);
        assert_eq!(card.metadata["component_type"], json!("fc"));
        assert_eq!(card.metadata["is_default_export"], json!(false));

        let context = find(&drafts, "ThemeContext");
        assert_eq!(context.chunk_type, ChunkType::Context);
        assert_eq!(context.metadata["context_type"], json!("{ theme: string }"));

        let hook = find(&drafts, "useTheme");
        assert_eq!(hook.chunk_type, ChunkType::Hook);
        assert_eq!(hook.metadata["hooks_used"], json!(["useContext"]));

        assert_eq!(find(&drafts, "MemoizedButton").metadata["component_type"], json!("memo"));

        let app = find(&drafts, "App");
        assert_eq!(app.chunk_type, ChunkType::Component);
        assert_eq!(app.metadata["is_default_export"], json!(true));
        assert_eq!(app.metadata["hooks_used"], json!(["useState"]));

        assert_eq!(find(&drafts, "ButtonProps").metadata["kind"], json!("interface"));
    }

    #[test]
    fn test_helpers() {
        assert!(is_hook_name("useWindowSize"));
        assert!(!is_hook_name("user"));
        assert!(is_fc_annotation("React.FC<{ children: React.ReactNode }>"));
        assert_eq!(generic_argument("FC<Props>"), Some("Props".to_string()));
    }
}
