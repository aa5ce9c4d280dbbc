//! DriftDB CLI
//!
//! Command-line tools for inspecting DriftDB stores.
//!
//! # Commands
//!
//! - `inspect` - Display version, replica, class counts and outbox size
//! - `verify` - Check the store image and the outbox ordering
//! - `dump-oplog` - List operations awaiting upload

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DriftDB command-line store tools.
#[derive(Parser)]
#[command(name = "driftdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display store statistics and metadata
    Inspect {
        /// Show the declared schema
        #[arg(short, long)]
        schema: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify the store image and outbox
    Verify,

    /// List operations awaiting upload
    DumpOplog {
        /// Maximum number of operations to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

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
        Commands::Inspect { schema, format } => {
            let path = cli.path.ok_or("store path required for inspect")?;
            commands::inspect::run(&path, schema, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::DumpOplog { limit, format } => {
            let path = cli.path.ok_or("store path required for dump-oplog")?;
            commands::dump_oplog::run(&path, limit, format)?;
        }
        Commands::Version => {
            println!("DriftDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("DriftDB Core v{}", driftdb_core::VERSION);
            println!(
                "Sync protocol v{}",
                driftdb_sync_protocol::PROTOCOL_VERSION
            );
        }
    }

    Ok(())
}
