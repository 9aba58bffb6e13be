//! code-chunker - Incremental structural chunking of source code
//!
//! This library segments source files into semantic chunks (functions,
//! classes, methods, components, imports, ...) and keeps those chunks
//! up to date as files are edited, reparsing only the regions an edit
//! touches while keeping chunk ids stable.

pub mod cli;
pub mod error;
pub mod extract;
pub mod incremental;
pub mod repo;
pub mod storage;

/// Re-export commonly used types
pub use error::{ChunkError, Result};
pub use extract::{ChunkType, Language, LanguageProcessor, ProcessorRegistry};
pub use incremental::{
    CancelFlag, Chunk, ChangeDetector, ChangeSet, FileVersion, IdMatchStrategy, IncrementalParser,
    ParseMode, ParseOutcome, ParseReport, ParserConfig, Span, UseCase,
};
pub use repo::{ChunkerConfig, Workspace};
pub use storage::{ChunkStore, Database};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "code-chunker";
