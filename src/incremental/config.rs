//! Tuning for the incremental engine

use crate::error::{ChunkError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Usage profile selecting escalation and id-matching defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UseCase {
    /// Fine-grained incremental reparsing for editor-style workloads
    #[default]
    InteractiveEdit,
    /// Always parse whole files; simplest and slowest
    BatchIngest,
}

impl std::fmt::Display for UseCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UseCase::InteractiveEdit => write!(f, "interactive-edit"),
            UseCase::BatchIngest => write!(f, "batch-ingest"),
        }
    }
}

/// How regenerated chunks are linked to the ids of invalidated ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdMatchStrategy {
    /// Same type and name, paired in order of appearance
    StrictNameType,
    /// Same type and name, nearest position wins; recently dropped ids
    /// nearby may be revived
    NameTypeProximity,
}

/// Configuration of an `IncrementalParser`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    pub use_case: UseCase,
    /// Escalate to a full parse once invalidated chunks exceed this share
    /// of the file's chunks; 0 always parses in full
    pub escalation_fraction: f32,
    pub id_match_strategy: IdMatchStrategy,
    /// Distance within which a dropped id can be revived
    pub proximity_lines: usize,
    /// Maximum number of cached files; `None` is unbounded
    pub cache_capacity: Option<usize>,
    /// Upper bound on time spent computing one diff
    pub diff_timeout_ms: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self::for_use_case(UseCase::default())
    }
}

impl ParserConfig {
    /// Defaults for a profile
    pub fn for_use_case(use_case: UseCase) -> Self {
        match use_case {
            UseCase::InteractiveEdit => Self {
                use_case,
                escalation_fraction: 0.5,
                id_match_strategy: IdMatchStrategy::NameTypeProximity,
                proximity_lines: 3,
                cache_capacity: None,
                diff_timeout_ms: 500,
            },
            UseCase::BatchIngest => Self {
                use_case,
                escalation_fraction: 0.0,
                id_match_strategy: IdMatchStrategy::StrictNameType,
                proximity_lines: 0,
                cache_capacity: None,
                diff_timeout_ms: 2000,
            },
        }
    }

    /// Check that values are in range
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.escalation_fraction) {
            return Err(ChunkError::invalid_config(format!(
                "escalation_fraction must be within [0, 1], got {}",
                self.escalation_fraction
            )));
        }
        if self.cache_capacity == Some(0) {
            return Err(ChunkError::invalid_config(
                "cache_capacity must be at least 1",
            ));
        }
        if self.diff_timeout_ms == 0 {
            return Err(ChunkError::invalid_config(
                "diff_timeout_ms must be positive",
            ));
        }
        Ok(())
    }

    pub fn diff_timeout(&self) -> Duration {
        Duration::from_millis(self.diff_timeout_ms)
    }

    /// Incremental reparsing is disabled altogether
    pub fn always_full(&self) -> bool {
        self.escalation_fraction <= 0.0
    }
}
