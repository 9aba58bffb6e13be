//! code-chunker - Incremental structural chunking of source code
//!
//! Splits source files into semantic chunks and keeps them current as the
//! files change.

use anyhow::Result;
use code_chunker::cli::{
    config, index, init, invalidate, parse, print_summary, show, status, watch, Cli, Commands,
};
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Get workspace path
    let workspace = Path::new(&cli.path);

    // Execute command
    match cli.command {
        Commands::Init(args) => {
            init(workspace, args.force)?;
        }

        Commands::Parse(args) => {
            parse(workspace, &args.file, args.language, cli.format)?;
        }

        Commands::Index(args) => {
            let summary = index(workspace, args.full)?;
            print_summary(&summary, cli.format)?;
        }

        Commands::Show(args) => {
            show(workspace, &args.file, cli.format)?;
        }

        Commands::Invalidate(args) => {
            invalidate(workspace, args.file.as_deref(), args.all)?;
        }

        Commands::Watch(args) => {
            watch(workspace, args.debounce)?;
        }

        Commands::Status => {
            status(workspace, cli.format)?;
        }

        Commands::Config(args) => {
            config(workspace, args.show, args.reset, cli.format)?;
        }
    }

    Ok(())
}
