//! CLI interface using clap
//!
//! Provides the command-line interface for code-chunker

mod commands;

pub use commands::*;

use crate::extract::Language;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// code-chunker - Incremental structural chunking of source code
#[derive(Parser, Debug)]
#[command(name = "code-chunker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the workspace (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    pub path: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize code-chunker in a workspace
    Init(InitArgs),

    /// Parse a single file and print its chunks
    Parse(ParseArgs),

    /// Chunk every source file in the workspace
    Index(IndexArgs),

    /// Show the stored chunks of a file
    Show(ShowArgs),

    /// Drop stored versions so the next index parses from scratch
    Invalidate(InvalidateArgs),

    /// Watch for changes and reparse incrementally
    Watch(WatchArgs),

    /// Show index statistics
    Status,

    /// Show configuration
    Config(ConfigArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Arguments for init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Force re-initialization
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for parse command
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// File to parse
    pub file: PathBuf,

    /// Language override (python, rust, javascript, typescript, tsx)
    #[arg(short, long)]
    pub language: Option<Language>,
}

/// Arguments for index command
#[derive(Parser, Debug)]
pub struct IndexArgs {
    /// Parse every file in full instead of incrementally
    #[arg(short, long)]
    pub full: bool,
}

/// Arguments for show command
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// File whose chunks to show
    pub file: PathBuf,
}

/// Arguments for invalidate command
#[derive(Parser, Debug)]
pub struct InvalidateArgs {
    /// File to invalidate
    pub file: Option<PathBuf>,

    /// Invalidate every file
    #[arg(short, long, conflicts_with = "file")]
    pub all: bool,
}

/// Arguments for watch command
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Debounce interval in milliseconds
    #[arg(short, long, default_value = "300")]
    pub debounce: u64,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show the configuration (the default when no other flag is given)
    #[arg(long)]
    pub show: bool,

    /// Reset to defaults
    #[arg(long)]
    pub reset: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["code-chunker", "index", "--full"]);
        assert!(matches!(cli.command, Commands::Index(_)));

        if let Commands::Index(args) = cli.command {
            assert!(args.full);
        }
    }

    #[test]
    fn test_parse_command_with_language() {
        let cli = Cli::parse_from(["code-chunker", "-o", "json", "parse", "a.txt", "-l", "py"]);
        assert_eq!(cli.format, OutputFormat::Json);
        if let Commands::Parse(args) = cli.command {
            assert_eq!(args.language, Some(Language::Python));
            assert_eq!(args.file, PathBuf::from("a.txt"));
        } else {
            panic!("expected parse command");
        }
    }

    #[test]
    fn test_invalidate_all_conflicts_with_file() {
        assert!(Cli::try_parse_from(["code-chunker", "invalidate", "a.py", "--all"]).is_err());
        let cli = Cli::parse_from(["code-chunker", "invalidate", "--all"]);
        if let Commands::Invalidate(args) = cli.command {
            assert!(args.all);
            assert!(args.file.is_none());
        }
    }
}
