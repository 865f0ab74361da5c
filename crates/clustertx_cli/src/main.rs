//! clustertx CLI
//!
//! Offline tools for the durable session ledger.
//!
//! # Commands
//!
//! - `inspect` - Display the recovered ledger
//! - `verify` - Check both ledger slots

mod commands;

use clap::{Parser, Subcommand};
use clustertx_core::LedgerConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// clustertx session ledger tools.
#[derive(Parser)]
#[command(name = "clustertx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the ledger directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Base name of the slot files
    #[arg(global = true, long, default_value = "session-tracker")]
    base_name: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the recovered ledger
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check both ledger slots
    Verify {
        /// Also fail when only one slot is invalid
        #[arg(short, long)]
        strict: bool,
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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Ledger path required for inspect")?;
            let config = LedgerConfig::new(path).base_name(cli.base_name);
            commands::inspect::run(&config, &format)?;
        }
        Commands::Verify { strict } => {
            let path = cli.path.ok_or("Ledger path required for verify")?;
            let config = LedgerConfig::new(path).base_name(cli.base_name);
            commands::verify::run(&config, strict)?;
        }
        Commands::Version => {
            println!("clustertx CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
