//! CLI commands.

pub mod ask;
pub mod chat;
pub mod models;
pub mod status;
mod respond;

use std::sync::Arc;

use clap::Args;
use parley_core::{
    CatalogError, ChatSession, ConfigUpdate, ConnectivityMonitor, Model, ModelCatalog, RelayConfig,
    SessionConfig,
};

/// Generation settings shared by `ask` and `chat`.
#[derive(Args, Debug, Default)]
pub(crate) struct SettingsArgs {
    /// Model to use (default: first installed model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature, 0.0 to 2.0
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Maximum number of tokens to generate
    #[arg(long)]
    pub max_tokens: Option<i64>,

    /// System prompt
    #[arg(long)]
    pub system: Option<String>,

    /// Wait for the whole answer instead of streaming it
    #[arg(long)]
    pub no_stream: bool,
}

impl SettingsArgs {
    fn update(&self) -> ConfigUpdate {
        let mut update = ConfigUpdate::new();
        if let Some(temperature) = self.temperature {
            update = update.temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            update = update.max_tokens(max_tokens);
        }
        if let Some(system) = &self.system {
            update = update.system_prompt(system.clone());
        }
        if self.no_stream {
            update = update.streaming(false);
        }
        update
    }
}

/// Build a session for the requested (or first installed) model with the
/// command-line settings applied.
pub(crate) async fn open_session(
    relay: &RelayConfig,
    settings: &SettingsArgs,
) -> miette::Result<(Arc<ChatSession>, ModelCatalog, ConnectivityMonitor)> {
    let catalog = ModelCatalog::from_config(relay);
    let monitor = ConnectivityMonitor::from_config(relay);

    let model = select_model(relay, &catalog, settings.model.as_deref()).await?;
    let session = ChatSession::from_config(
        relay,
        catalog.clone(),
        monitor.clone(),
        SessionConfig::with_model(&model.id),
    );

    let update = settings.update();
    if !update.is_empty() {
        session
            .update_config(&update)
            .map_err(|e| miette::miette!("{}", e))?;
    }

    Ok((Arc::new(session), catalog, monitor))
}

/// Refresh the catalog and pick a model from it.
pub(crate) async fn select_model(
    relay: &RelayConfig,
    catalog: &ModelCatalog,
    requested: Option<&str>,
) -> miette::Result<Model> {
    let models = match catalog.refresh().await {
        Ok(models) => models,
        Err(CatalogError::Unreachable(url)) => {
            print_troubleshooting(&url);
            return Err(miette::miette!("Daemon not reachable at {}", relay.base_url));
        }
        Err(CatalogError::EmptyCatalog) => {
            print_pull_hint();
            return Err(miette::miette!("No models installed"));
        }
        Err(e) => return Err(miette::miette!("{}", e)),
    };

    match requested {
        Some(id) => catalog.find(id).ok_or_else(|| {
            miette::miette!(
                "Model '{}' is not installed. Pull it with: ollama pull {}",
                id,
                id
            )
        }),
        None => models
            .first()
            .cloned()
            .ok_or_else(|| miette::miette!("No models installed")),
    }
}

pub(crate) fn print_troubleshooting(url: &str) {
    eprintln!("Could not reach the Ollama daemon at {}.", url);
    eprintln!();
    eprintln!("Troubleshooting:");
    eprintln!("  1. Install Ollama from https://ollama.com/download");
    eprintln!("  2. Start the daemon with: ollama serve");
    eprintln!("  3. Check the address (--url, PARLEY_DAEMON_URL or OLLAMA_HOST)");
    eprintln!();
}

pub(crate) fn print_pull_hint() {
    eprintln!("No models are installed on the daemon.");
    eprintln!();
    eprintln!("Install one, for example:");
    eprintln!("  ollama pull llama2");
    eprintln!();
}

/// Human-readable byte count.
pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
