//! Error taxonomy for the chunking core

use crate::extract::Language;
use thiserror::Error;

/// Result type for core chunking operations
pub type Result<T> = std::result::Result<T, ChunkError>;

/// Errors raised by the chunking core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkError {
    /// A language processor could not segment its input
    #[error("Malformed {language} input: {reason}")]
    MalformedInput { language: Language, reason: String },

    /// The change detector could not produce a trustworthy line diff
    #[error("Diff inconclusive: {0}")]
    DiffInconclusive(String),

    /// No cached version exists for a file
    #[error("No cached version for {0}")]
    CacheMiss(String),

    /// An internal invariant was broken; this is a bug, never a data condition
    #[error("Invariant violated for {file}: {detail}")]
    InvariantViolation { file: String, detail: String },

    /// Both the incremental and the full parse failed
    #[error("Failed to parse {file}: {reason}")]
    ParseFailed { file: String, reason: String },

    /// No processor is registered for a language
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operation was cancelled before it could publish a result
    #[error("Parse of {0} was cancelled")]
    Cancelled(String),
}

impl ChunkError {
    /// Create a malformed input error
    pub fn malformed(language: Language, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            language,
            reason: reason.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant(file: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            file: file.into(),
            detail: detail.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the orchestrator may retry with a full-file parse
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChunkError::MalformedInput { .. } | ChunkError::DiffInconclusive(_)
        )
    }

    /// Whether this error signals a defect in the engine itself
    pub fn is_defect(&self) -> bool {
        matches!(self, ChunkError::InvariantViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ChunkError::malformed(Language::Python, "bad").is_recoverable());
        assert!(ChunkError::DiffInconclusive("binary".into()).is_recoverable());
        assert!(!ChunkError::CacheMiss("a.py".into()).is_recoverable());
        assert!(!ChunkError::invariant("a.py", "overlap").is_recoverable());
    }

    #[test]
    fn test_defect_classification() {
        assert!(ChunkError::invariant("a.py", "overlap").is_defect());
        assert!(!ChunkError::ParseFailed {
            file: "a.py".into(),
            reason: "x".into()
        }
        .is_defect());
    }

    #[test]
    fn test_display() {
        let err = ChunkError::malformed(Language::Rust, "nul byte");
        assert_eq!(err.to_string(), "Malformed rust input: nul byte");
    }
}
