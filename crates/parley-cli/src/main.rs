//! Parley CLI - chat with models served by a local Ollama daemon.

use std::time::Duration;

use clap::{Parser, Subcommand};
use parley_core::RelayConfig;

mod commands;

/// Parley - a terminal chat client for a local model daemon
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Daemon URL (default: $PARLEY_DAEMON_URL, $OLLAMA_HOST or http://localhost:11434)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Seconds to wait for the daemon before giving up on a reply
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the daemon is running
    Status,

    /// List installed models
    Models,

    /// Ask a single question and print the answer
    Ask {
        /// The question
        prompt: String,
        #[command(flatten)]
        settings: commands::SettingsArgs,
    },

    /// Start an interactive chat
    Chat {
        #[command(flatten)]
        settings: commands::SettingsArgs,
    },
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let mut relay = RelayConfig::from_env();
    if let Some(url) = cli.url {
        relay = relay.with_base_url(url);
    }
    if let Some(secs) = cli.timeout.filter(|s| *s > 0) {
        relay.idle_timeout = Duration::from_secs(secs);
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| miette::miette!("Failed to start async runtime: {}", e))?;

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Status => commands::status::run(&relay).await,
            Commands::Models => commands::models::run(&relay).await,
            Commands::Ask { prompt, settings } => {
                commands::ask::run(&relay, &prompt, &settings).await
            }
            Commands::Chat { settings } => commands::chat::run(&relay, &settings).await,
        }
    });

    // A pending stdin read would otherwise hold the process open.
    runtime.shutdown_background();
    result
}
