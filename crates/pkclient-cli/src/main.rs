//! pkctl - Command-line front end for the PackageKit client library
//!
//! Provides commands for:
//! - Searching, resolving and inspecting packages
//! - Installing, removing and updating packages
//! - Reading the transaction history
//! - Inspecting the package service
//! - Managing offline updates

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pkclient_core::config::ClientConfig;
use pkclient_ipc::Daemon;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    config::ConfigCommand,
    daemon::DaemonCommand,
    offline::OfflineCommand,
    packages::{InstallCommand, RefreshCommand, RemoveCommand, UpdateCommand},
    query::{DetailsCommand, FilesCommand, HistoryCommand, ResolveCommand, SearchCommand, UpdatesCommand},
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "pkctl", version, about = "Package management through PackageKit")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Search packages by name, description, file or group
    Search(SearchCommand),
    /// Resolve package names to package ids
    Resolve(ResolveCommand),
    /// Show package details
    Details(DetailsCommand),
    /// List the files of packages
    Files(FilesCommand),
    /// List available updates
    Updates(UpdatesCommand),
    /// Install packages
    Install(InstallCommand),
    /// Remove packages
    Remove(RemoveCommand),
    /// Update packages
    Update(UpdateCommand),
    /// Refresh the package metadata
    Refresh(RefreshCommand),
    /// Show past transactions
    History(HistoryCommand),
    /// Inspect the package service
    #[command(subcommand)]
    Daemon(DaemonCommand),
    /// Manage offline updates
    #[command(subcommand)]
    Offline(OfflineCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(ClientConfig::default_path);
    let config = ClientConfig::load_or_default(&config_path);

    // Setup tracing
    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => config.logging.level.as_str(),
        (false, 1) => "debug",
        (false, _) => "trace",
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

    if let Commands::Config(cmd) = &cli.command {
        return cmd.execute(&config_path, &config, format).await;
    }

    let daemon = Daemon::connect_with_config(config)
        .await
        .context("Failed to connect to the system bus")?;

    match cli.command {
        Commands::Search(cmd) => cmd.execute(&daemon, format).await,
        Commands::Resolve(cmd) => cmd.execute(&daemon, format).await,
        Commands::Details(cmd) => cmd.execute(&daemon, format).await,
        Commands::Files(cmd) => cmd.execute(&daemon, format).await,
        Commands::Updates(cmd) => cmd.execute(&daemon, format).await,
        Commands::Install(cmd) => cmd.execute(&daemon, format).await,
        Commands::Remove(cmd) => cmd.execute(&daemon, format).await,
        Commands::Update(cmd) => cmd.execute(&daemon, format).await,
        Commands::Refresh(cmd) => cmd.execute(&daemon, format).await,
        Commands::History(cmd) => cmd.execute(&daemon, format).await,
        Commands::Daemon(cmd) => cmd.execute(&daemon, format).await,
        Commands::Offline(cmd) => cmd.execute(&daemon, format).await,
        Commands::Config(_) => Ok(()),
    }
}
