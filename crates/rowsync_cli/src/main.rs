//! rowsync CLI
//!
//! Command-line tools for looking inside batch directories written by the
//! change selector.
//!
//! # Commands
//!
//! - `inspect` - Display the batch summary and its parts
//! - `verify` - Check every part file against the summary
//! - `dump-part` - Dump the rows of one part for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// rowsync batch directory tools.
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the batch directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the batch summary and its parts
    Inspect {
        /// Show the sanitized schema carried by the batch
        #[arg(short, long)]
        schema: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every part file against the summary
    Verify,

    /// Dump the rows of one part
    DumpPart {
        /// Part index
        index: u32,

        /// Maximum number of rows to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { schema, format } => {
            let path = cli.path.ok_or("Batch path required for inspect")?;
            commands::inspect::run(&path, schema, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Batch path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::DumpPart {
            index,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Batch path required for dump-part")?;
            commands::dump_part::run(&path, index, limit, &format)?;
        }
        Commands::Version => {
            println!("rowsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Part format v{}", rowsync_engine::PART_VERSION);
        }
    }

    Ok(())
}
