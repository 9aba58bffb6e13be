//! Workspace discovery and source file enumeration
//!
//! A workspace is a directory tree whose supported source files are
//! chunked. State (configuration and the snapshot database) lives under
//! `.code-chunker/` at the workspace root.

mod config;

pub use config::{glob_match, ChunkerConfig, ParserSection};

use crate::extract::Language;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Name of the per-workspace state directory
pub const STATE_DIR: &str = ".code-chunker";

/// File name of the snapshot database inside the state directory
pub const DATABASE_FILE: &str = "chunks.db";

/// A source file selected for chunking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Workspace-relative path with `/` separators
    pub identity: String,
    /// Absolute path on disk
    pub path: PathBuf,
    pub language: Language,
}

/// A directory tree being chunked
pub struct Workspace {
    /// Path to the workspace root
    root: PathBuf,
    /// Workspace configuration
    config: ChunkerConfig,
}

impl Workspace {
    /// Open the workspace rooted at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let root = path
            .canonicalize()
            .with_context(|| format!("Failed to open workspace at {:?}", path))?;
        if !root.is_dir() {
            anyhow::bail!("Workspace root is not a directory: {:?}", root);
        }

        let config = ChunkerConfig::load_or_default(&root)?;

        Ok(Self { root, config })
    }

    /// Get the workspace root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the workspace configuration
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Get the path to the state directory
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Get the path to the snapshot database
    pub fn database_path(&self) -> PathBuf {
        self.state_dir().join(DATABASE_FILE)
    }

    /// Whether `init` has been run for this workspace
    pub fn is_initialized(&self) -> bool {
        self.database_path().exists()
    }

    /// Initialize the state directory if it doesn't exist
    pub fn init_state_dir(&self) -> Result<PathBuf> {
        let state_dir = self.state_dir();
        if !state_dir.exists() {
            std::fs::create_dir_all(&state_dir)
                .with_context(|| format!("Failed to create {:?}", state_dir))?;
        }
        Ok(state_dir)
    }

    /// Identity of a path inside the workspace
    pub fn relative_identity(&self, path: &Path) -> Result<String> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let absolute = absolute.canonicalize().unwrap_or(absolute);
        let relative = absolute
            .strip_prefix(&self.root)
            .with_context(|| format!("{:?} is outside the workspace {:?}", path, self.root))?;

        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }

    /// Resolve a file argument into a source file
    pub fn resolve(&self, file: &Path, language: Option<Language>) -> Result<SourceFile> {
        let identity = self.relative_identity(file)?;
        let path = self.root.join(&identity);
        let language = match language {
            Some(language) => language,
            None => Language::from_path(&path)
                .with_context(|| format!("Cannot detect the language of {}", identity))?,
        };
        Ok(SourceFile {
            identity,
            path,
            language,
        })
    }

    /// Read a file's text
    pub fn read_source(&self, file: &SourceFile) -> Result<String> {
        std::fs::read_to_string(&file.path)
            .with_context(|| format!("Failed to read file: {:?}", file.path))
    }

    /// List every source file selected by the configuration, sorted by identity
    pub fn source_files(&self) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();

        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_str().unwrap_or("");
                e.depth() == 0 || !(e.file_type().is_dir() && name.starts_with('.'))
            })
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(&self.root)?;
            let identity = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            if self.config.should_ignore(&identity) || !self.config.is_included(&identity) {
                continue;
            }
            let Some(language) = self.config.language_for(relative) else {
                continue;
            };

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.config.max_file_bytes {
                tracing::warn!(
                    "Skipping {} ({} bytes exceeds max_file_bytes {})",
                    identity,
                    size,
                    self.config.max_file_bytes
                );
                continue;
            }

            files.push(SourceFile {
                identity,
                path: entry.path().to_path_buf(),
                language,
            });
        }

        files.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_source_files_respect_config() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/lib.rs", "fn a() {}\n");
        write(dir.path(), "pkg/app.py", "def f():\n    pass\n");
        write(dir.path(), "web/app.min.js", "function f() {}\n");
        write(dir.path(), "target/debug/gen.rs", "fn g() {}\n");
        write(dir.path(), ".hidden/x.py", "x = 1\n");
        write(dir.path(), "README.md", "# readme\n");

        let workspace = Workspace::open(dir.path()).unwrap();
        let files = workspace.source_files().unwrap();
        let identities: Vec<&str> = files.iter().map(|f| f.identity.as_str()).collect();

        assert_eq!(identities, vec!["pkg/app.py", "src/lib.rs"]);
        assert_eq!(files[0].language, Language::Python);
    }

    #[test]
    fn test_oversized_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut config = ChunkerConfig::default();
        config.max_file_bytes = 8;
        config.save(dir.path()).unwrap();
        write(dir.path(), "big.py", "def long_function_name():\n    pass\n");

        let workspace = Workspace::open(dir.path()).unwrap();
        assert!(workspace.source_files().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        let workspace = Workspace::open(dir.path()).unwrap();

        let relative = workspace.resolve(Path::new("src/main.rs"), None).unwrap();
        let absolute = workspace
            .resolve(&workspace.root().join("src/main.rs"), None)
            .unwrap();
        assert_eq!(relative, absolute);
        assert_eq!(relative.identity, "src/main.rs");
        assert_eq!(relative.language, Language::Rust);

        assert!(workspace.resolve(Path::new("notes.txt"), None).is_err());
        let forced = workspace
            .resolve(Path::new("notes.txt"), Some(Language::Python))
            .unwrap();
        assert_eq!(forced.language, Language::Python);
    }

    #[test]
    fn test_state_dir_paths() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        assert!(!workspace.is_initialized());
        let state = workspace.init_state_dir().unwrap();
        assert!(state.ends_with(STATE_DIR));
        assert!(workspace.database_path().ends_with(DATABASE_FILE));
    }
}
