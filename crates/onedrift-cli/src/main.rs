//! onedrift CLI - command-line interface
//!
//! Provides commands for:
//! - Running sync cycles (`sync`)
//! - Verifying converged files against the baseline (`verify`)
//! - Listing conflicts (`conflicts`)
//! - Resolving conflicts (`resolve`)

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;
mod output;

use commands::conflicts::ConflictsCommand;
use commands::resolve::ResolveCommand;
use commands::sync::SyncCommand;
use commands::verify::VerifyCommand;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "onedrift", version, about = "Bidirectional OneDrive synchronization")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Synchronize the local tree with the remote drive
    Sync(SyncCommand),
    /// Re-hash converged files and compare against the baseline
    Verify(VerifyCommand),
    /// List synchronization conflicts
    Conflicts(ConflictsCommand),
    /// Resolve a conflict
    Resolve(ResolveCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let config_path = cli.config.clone();

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(format, config_path.as_deref()).await,
        Commands::Verify(cmd) => cmd.execute(format, config_path.as_deref()).await,
        Commands::Conflicts(cmd) => cmd.execute(format, config_path.as_deref()).await,
        Commands::Resolve(cmd) => cmd.execute(format, config_path.as_deref()).await,
    }
}
