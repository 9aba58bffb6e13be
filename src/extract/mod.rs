//! Semantic chunk extraction module
//!
//! This module turns source text into ordered chunk drafts:
//! - `LanguageProcessor` is the per-language segmentation capability
//! - Tree-sitter backed processors for Python, Rust, JavaScript, TypeScript and Go
//! - A pure confidence scorer applied to every draft

pub mod confidence;
pub mod go;
pub mod javascript;
pub mod language;
pub mod python;
pub mod rust;
mod syntax;

pub use confidence::{score, ScoreInput, StructuralSignals};
pub use go::GoProcessor;
pub use javascript::ScriptProcessor;
pub use language::Language;
pub use python::PythonProcessor;
pub use rust::RustProcessor;

use crate::error::{ChunkError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Compute a stable hash for content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Language-specific attributes attached to a chunk
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Kind of construct a chunk represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Method,
    Class,
    Component,
    Hook,
    Context,
    Import,
    Export,
    Trait,
    Impl,
    Other,
}

impl ChunkType {
    /// Get the tag used in ids and serialized output
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Method => "method",
            ChunkType::Class => "class",
            ChunkType::Component => "component",
            ChunkType::Hook => "hook",
            ChunkType::Context => "context",
            ChunkType::Import => "import",
            ChunkType::Export => "export",
            ChunkType::Trait => "trait",
            ChunkType::Impl => "impl",
            ChunkType::Other => "other",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of a file a processor is asked to segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseScope {
    /// The whole file; syntax errors are recovered from
    File,
    /// A reparse window cut from a file; any syntax error is a failure
    Window,
}

/// A chunk as produced by a processor, before scoring and id assignment
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub chunk_type: ChunkType,
    pub name: String,
    /// First line, 1-indexed, relative to the processed text
    pub start_line: usize,
    /// Last line, inclusive
    pub end_line: usize,
    pub raw_confidence: f32,
    /// The construct contains error or missing nodes
    pub has_errors: bool,
    pub metadata: Metadata,
}

impl ChunkDraft {
    /// Create a draft with default confidence and no metadata
    pub fn new(chunk_type: ChunkType, name: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            chunk_type,
            name: name.into(),
            start_line,
            end_line,
            raw_confidence: 0.9,
            has_errors: false,
            metadata: Metadata::new(),
        }
    }

    /// Builder-style raw confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.raw_confidence = confidence;
        self
    }

    /// Attach a metadata value
    pub fn insert_meta(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Move the draft down by `lines`
    pub fn offset(mut self, lines: usize) -> Self {
        self.start_line += lines;
        self.end_line += lines;
        self
    }

    fn overlaps(&self, other: &ChunkDraft) -> bool {
        self.start_line <= other.end_line && other.start_line <= self.end_line
    }
}

/// Output of one processor invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Drafts sorted by start line, pairwise non-overlapping
    pub drafts: Vec<ChunkDraft>,
    /// The parser had to recover from syntax errors
    pub recovered: bool,
    /// 1-indexed inclusive line spans of the top-level syntax nodes
    pub outline: Vec<(usize, usize)>,
}

/// Per-language segmentation capability
pub trait LanguageProcessor: Send + Sync {
    /// The language this processor handles
    fn language(&self) -> Language;

    /// Segment `text` into chunk drafts; deterministic for identical input
    fn process(&self, text: &str, scope: ParseScope) -> Result<Extraction>;

    /// Whether a reparse window may start at `line`, given the previous
    /// non-blank line
    fn is_window_boundary(&self, previous: Option<&str>, line: &str) -> bool {
        syntax::starts_top_level(line, &[])
            && !previous.is_some_and(syntax::is_attachment_line)
    }
}

/// Sort drafts and drop any that overlap an earlier, wider one
pub fn normalize_drafts(mut drafts: Vec<ChunkDraft>) -> Vec<ChunkDraft> {
    drafts.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then(b.end_line.cmp(&a.end_line))
    });

    let mut kept: Vec<ChunkDraft> = Vec::with_capacity(drafts.len());
    for draft in drafts {
        if draft.start_line == 0 || draft.end_line < draft.start_line {
            tracing::warn!("Dropping draft {} with invalid span", draft.name);
            continue;
        }
        if let Some(last) = kept.last() {
            if last.overlaps(&draft) {
                tracing::debug!(
                    "Dropping draft {} ({}-{}) overlapping {}",
                    draft.name,
                    draft.start_line,
                    draft.end_line,
                    last.name
                );
                continue;
            }
        }
        kept.push(draft);
    }
    kept
}

/// Lookup from language tag to processor
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<Language, Arc<dyn LanguageProcessor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in processor
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PythonProcessor::new()));
        registry.register(Arc::new(RustProcessor::new()));
        registry.register(Arc::new(ScriptProcessor::new(Language::JavaScript)));
        registry.register(Arc::new(ScriptProcessor::new(Language::TypeScript)));
        registry.register(Arc::new(ScriptProcessor::new(Language::Tsx)));
        registry.register(Arc::new(GoProcessor::new()));
        registry
    }

    /// Register (or replace) the processor for its language
    pub fn register(&mut self, processor: Arc<dyn LanguageProcessor>) {
        self.processors.insert(processor.language(), processor);
    }

    /// Get the processor for a language
    pub fn get(&self, language: Language) -> Result<&Arc<dyn LanguageProcessor>> {
        self.processors
            .get(&language)
            .ok_or_else(|| ChunkError::UnsupportedLanguage(language.to_string()))
    }

    /// Languages with a registered processor
    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<_> = self.processors.keys().copied().collect();
        languages.sort();
        languages
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}
