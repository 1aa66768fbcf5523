//! LTF CLI
//!
//! Command-line tools for LTF journals stored in mirror files.
//!
//! # Commands
//!
//! - `format` - Create and format mirror files
//! - `inspect` - Display superblock and journal state
//! - `verify` - Check every mirror and the recoverable history
//! - `dump-journal` - Dump the recovered journal for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LTF journal tools.
#[derive(Parser)]
#[command(name = "ltf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mirror file of the journal (repeat for each mirror)
    #[arg(global = true, short, long = "mirror")]
    mirrors: Vec<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create mirror files and format an empty journal on them
    Format {
        /// Number of segments in the ring
        #[arg(short = 'n', long, default_value = "64")]
        segments: u32,

        /// Segment size in bytes (multiple of 512)
        #[arg(short = 's', long, default_value = "524288")]
        segment_size: u32,

        /// Overwrite files that already hold a journal
        #[arg(short, long)]
        force: bool,
    },

    /// Display superblock and journal state
    Inspect {
        /// Show the state of every segment
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify mirrors and recoverable history
    Verify {
        /// Only print the verdict
        #[arg(short, long)]
        quiet: bool,
    },

    /// Dump recovered journal transactions
    DumpJournal {
        /// Maximum number of transactions to dump
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

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Format {
            segments,
            segment_size,
            force,
        } => {
            commands::format::run(&cli.mirrors, segments, segment_size, force)?;
        }
        Commands::Inspect { segments, format } => {
            commands::inspect::run(&cli.mirrors, segments, &format)?;
        }
        Commands::Verify { quiet } => {
            commands::verify::run(&cli.mirrors, quiet)?;
        }
        Commands::DumpJournal { limit, format } => {
            commands::dump_journal::run(&cli.mirrors, limit, &format)?;
        }
        Commands::Version => {
            println!("LTF CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("LTF Core v{}", ltf_core::VERSION);
        }
    }

    Ok(())
}
