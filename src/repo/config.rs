//! Workspace configuration for code-chunker

use super::STATE_DIR;
use crate::extract::Language;
use crate::incremental::{IdMatchStrategy, ParserConfig, UseCase};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a workspace being indexed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Patterns for files to index (glob patterns)
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,

    /// Patterns to ignore (glob patterns)
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Languages to index
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Files larger than this are skipped
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Incremental engine settings
    #[serde(default)]
    pub parser: ParserSection,
}

/// `[parser]` table: a profile plus optional overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserSection {
    /// Profile providing the defaults
    #[serde(default)]
    pub use_case: UseCase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_fraction: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_match_strategy: Option<IdMatchStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proximity_lines: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_capacity: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_timeout_ms: Option<u64>,
}

impl ParserSection {
    /// Apply overrides on top of the profile defaults
    pub fn resolve(&self) -> Result<ParserConfig> {
        let mut config = ParserConfig::for_use_case(self.use_case);
        if let Some(fraction) = self.escalation_fraction {
            config.escalation_fraction = fraction;
        }
        if let Some(strategy) = self.id_match_strategy {
            config.id_match_strategy = strategy;
        }
        if let Some(lines) = self.proximity_lines {
            config.proximity_lines = lines;
        }
        if self.cache_capacity.is_some() {
            config.cache_capacity = self.cache_capacity;
        }
        if let Some(timeout) = self.diff_timeout_ms {
            config.diff_timeout_ms = timeout;
        }
        config.validate().context("Invalid [parser] configuration")?;
        Ok(config)
    }
}

fn default_include_patterns() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "target/**".to_string(),
        "node_modules/**".to_string(),
        "dist/**".to_string(),
        "build/**".to_string(),
        "**/__pycache__/**".to_string(),
        format!("{}/**", STATE_DIR),
        "*.min.js".to_string(),
        "*.d.ts".to_string(),
    ]
}

fn default_languages() -> Vec<String> {
    Language::ALL.iter().map(|l| l.to_string()).collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            include_patterns: default_include_patterns(),
            ignore_patterns: default_ignore_patterns(),
            languages: default_languages(),
            max_file_bytes: default_max_file_bytes(),
            parser: ParserSection::default(),
        }
    }
}

impl ChunkerConfig {
    /// Load configuration from the workspace or return defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(STATE_DIR).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: ChunkerConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the workspace
    pub fn save(&self, root: &Path) -> Result<()> {
        let state_dir = root.join(STATE_DIR);
        std::fs::create_dir_all(&state_dir)?;

        let config_path = state_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Resolved engine configuration
    pub fn parser_config(&self) -> Result<ParserConfig> {
        self.parser.resolve()
    }

    /// Check if a path should be ignored
    pub fn should_ignore(&self, path: &str) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| glob_match(pattern, path))
    }

    /// Check if a path is selected for indexing
    pub fn is_included(&self, path: &str) -> bool {
        self.include_patterns
            .iter()
            .any(|pattern| glob_match(pattern, path))
    }

    /// Languages enabled in the configuration; unknown names are skipped
    pub fn enabled_languages(&self) -> Vec<Language> {
        let mut languages = Vec::new();
        for name in &self.languages {
            match name.parse::<Language>() {
                Ok(language) => languages.push(language),
                Err(e) => tracing::warn!("Ignoring configured language: {}", e),
            }
        }
        languages.sort();
        languages.dedup();
        languages
    }

    /// Language of a path if it is enabled
    pub fn language_for(&self, path: &Path) -> Option<Language> {
        let language = Language::from_path(path)?;
        self.languages
            .iter()
            .any(|name| name.eq_ignore_ascii_case(language.as_str()))
            .then_some(language)
    }
}

/// Glob matching over `/`-separated relative paths
///
/// `*` and `?` stay within one path segment, `**` spans segments. A
/// pattern without `/` is matched against the file name as well.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    if wildcard(pattern.as_bytes(), path.as_bytes()) {
        return true;
    }
    if !pattern.contains('/') {
        let name = path.rsplit('/').next().unwrap_or(path);
        return wildcard(pattern.as_bytes(), name.as_bytes());
    }
    false
}

fn wildcard(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') if pattern.get(1) == Some(&b'*') => {
            let rest = &pattern[2..];
            let rest = rest.strip_prefix(b"/").unwrap_or(rest);
            (0..=text.len()).any(|i| wildcard(rest, &text[i..]))
        }
        Some(b'*') => (0..=text.len())
            .take_while(|&i| i == 0 || text[i - 1] != b'/')
            .any(|i| wildcard(&pattern[1..], &text[i..])),
        Some(b'?') => {
            text.first().is_some_and(|&c| c != b'/') && wildcard(&pattern[1..], &text[1..])
        }
        Some(c) => text.first() == Some(c) && wildcard(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ChunkerConfig::default();
        assert!(!config.include_patterns.is_empty());
        assert_eq!(config.enabled_languages().len(), Language::ALL.len());
        assert_eq!(config.parser_config().unwrap(), ParserConfig::default());
    }

    #[test]
    fn test_glob_matching() {
        assert!(glob_match("*.py", "app.py"));
        assert!(glob_match("*.py", "pkg/app.py"));
        assert!(glob_match("src/**/*.rs", "src/a/b/lib.rs"));
        assert!(glob_match("src/**/*.rs", "src/lib.rs"));
        assert!(glob_match("target/**", "target/debug/build.rs"));
        assert!(glob_match("**/__pycache__/**", "pkg/__pycache__/m.py"));
        assert!(!glob_match("src/*.rs", "src/a/lib.rs"));
        assert!(!glob_match("*.rs", "README.md"));
        assert!(glob_match("**/*", "a/b/c.ts"));
    }

    #[test]
    fn test_parser_overrides() {
        let toml = r#"
languages = ["python"]

[parser]
use_case = "batch-ingest"
id_match_strategy = "name-type-proximity"
cache_capacity = 10
"#;
        let config: ChunkerConfig = toml::from_str(toml).unwrap();
        let parser = config.parser_config().unwrap();
        assert_eq!(parser.use_case, UseCase::BatchIngest);
        assert_eq!(parser.escalation_fraction, 0.0);
        assert_eq!(parser.id_match_strategy, IdMatchStrategy::NameTypeProximity);
        assert_eq!(parser.cache_capacity, Some(10));
        assert_eq!(config.language_for(Path::new("a.py")), Some(Language::Python));
        assert_eq!(config.language_for(Path::new("a.rs")), None);
        assert!(!config.ignore_patterns.is_empty());
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let config: ChunkerConfig =
            toml::from_str("[parser]\nescalation_fraction = 2.0\n").unwrap();
        assert!(config.parser_config().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut config = ChunkerConfig::default();
        config.parser.proximity_lines = Some(7);
        config.save(dir.path()).unwrap();

        let loaded = ChunkerConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
