//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod classify;
mod config_cmd;
mod fetch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use webacquire::config::Settings;

#[derive(Parser)]
#[command(name = "webacquire")]
#[command(about = "Fetch pages through pooled headless browsers")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "WEBACQUIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one or more URLs through the request queue
    Fetch {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,
        /// Navigation timeout per page in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Extra wait after load for script-rendered pages, in milliseconds
        #[arg(long)]
        wait_ms: Option<u64>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run block detection against a saved page
    Classify {
        /// HTML file to inspect
        file: PathBuf,
        /// HTTP status the page was served with
        #[arg(long)]
        status: Option<u16>,
        /// URL the page was served from
        #[arg(long)]
        url: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path).await?,
        None => Settings::load().await?,
    };

    match cli.command {
        Commands::Fetch {
            urls,
            timeout_ms,
            wait_ms,
            json,
        } => fetch::cmd_fetch(&settings, &urls, timeout_ms, wait_ms, json).await,
        Commands::Classify { file, status, url } => {
            classify::cmd_classify(&file, status, url.as_deref()).await
        }
        Commands::Config => config_cmd::cmd_config(&settings),
    }
}
