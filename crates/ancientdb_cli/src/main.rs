//! ancientdb CLI
//!
//! Command-line tools for inspecting and maintaining freezer directories.
//!
//! # Commands
//!
//! - `inspect` - Display per-table counts, tails, files and sizes
//! - `verify` - Read every visible item and report failures
//! - `dump` - Print a range of items of one table
//! - `truncate-head` - Discard items at and after a block number
//! - `truncate-tail` - Hide items before a block number, optionally pruning
//! - `reset` - Delete every item
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ancientdb command-line freezer tools.
#[derive(Parser)]
#[command(name = "ancientdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the freezer directory
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
    /// Display freezer tables and their state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify that every visible item can be read
    Verify,

    /// Print items of one table
    Dump {
        /// Table to read
        #[arg(short, long)]
        table: String,

        /// First item (defaults to the table's tail)
        #[arg(long)]
        from: Option<u64>,

        /// Number of items to print
        #[arg(short, long, default_value = "10")]
        count: u64,
    },

    /// Discard every item at or after ITEMS
    TruncateHead {
        /// Number of items to keep
        items: u64,
    },

    /// Hide every item of the prunable tables before TAIL
    TruncateTail {
        /// New tail
        tail: u64,

        /// Delete data files that only hold hidden items
        #[arg(long)]
        prune: bool,
    },

    /// Delete every item, keeping the table layout
    Reset,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Freezer path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Freezer path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump { table, from, count } => {
            let path = cli.path.ok_or("Freezer path required for dump")?;
            commands::dump::run(&path, &table, from, count)?;
        }
        Commands::TruncateHead { items } => {
            let path = cli.path.ok_or("Freezer path required for truncate-head")?;
            commands::truncate::run_head(&path, items)?;
        }
        Commands::TruncateTail { tail, prune } => {
            let path = cli.path.ok_or("Freezer path required for truncate-tail")?;
            commands::truncate::run_tail(&path, tail, prune)?;
        }
        Commands::Reset => {
            let path = cli.path.ok_or("Freezer path required for reset")?;
            commands::reset::run(&path)?;
        }
        Commands::Version => {
            println!("ancientdb CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ancientdb Core v{}", ancientdb_core::VERSION);
            println!(
                "Table metadata version {}",
                ancientdb_core::table::META_VERSION
            );
        }
    }

    Ok(())
}
