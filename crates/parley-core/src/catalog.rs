//! Cached catalog of the models installed on the daemon.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use parley_daemon::{ClientError, DaemonClient, InstalledModel};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;

/// A model installed on the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    /// Identifier used in generate requests (e.g. `llama2:7b`)
    pub id: String,
    pub display_name: String,
    pub size_bytes: Option<u64>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: display_name(&id),
            id,
            size_bytes: None,
            family: None,
            parameter_size: None,
        }
    }

    /// Whether `id` names this model. A bare name matches its `:latest` tag.
    pub fn matches(&self, id: &str) -> bool {
        strip_latest(&self.id) == strip_latest(id)
    }
}

impl From<InstalledModel> for Model {
    fn from(installed: InstalledModel) -> Self {
        let details = installed.details.unwrap_or_default();
        Self {
            size_bytes: installed.size,
            family: details.family,
            parameter_size: details.parameter_size,
            ..Model::new(installed.name)
        }
    }
}

fn strip_latest(id: &str) -> &str {
    id.strip_suffix(":latest").unwrap_or(id)
}

/// Friendly name: tag removed, words split on `-`, each capitalised.
pub fn display_name(id: &str) -> String {
    id.split(':')
        .next()
        .unwrap_or(id)
        .split('-')
        .map(|s| {
            let mut c = s.chars();
            match c.next() {
                None => String::new(),
                Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Catalog refresh failures.
///
/// Cloneable: one refresh outcome is handed to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Daemon not reachable at {0}. Start it with: ollama serve")]
    Unreachable(String),
    #[error("No models installed. Install one with: ollama pull <model-name>")]
    EmptyCatalog,
    #[error("Failed to list models: {0}")]
    Failed(String),
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<[Model]>, CatalogError>>>;

#[derive(Debug)]
struct Snapshot {
    models: Arc<[Model]>,
    refreshed_at: Option<Instant>,
}

/// Process-wide model catalog.
///
/// Clones share the same cache. Refreshes replace the cached set wholesale
/// and at most one refresh runs at a time; concurrent callers await the one
/// in progress.
#[derive(Clone)]
pub struct ModelCatalog {
    client: DaemonClient,
    stale_after: Duration,
    snapshot: Arc<RwLock<Snapshot>>,
    in_flight: Arc<Mutex<Option<RefreshFuture>>>,
}

impl ModelCatalog {
    pub fn new(client: DaemonClient, stale_after: Duration) -> Self {
        Self {
            client,
            stale_after,
            snapshot: Arc::new(RwLock::new(Snapshot {
                models: Arc::from(Vec::new()),
                refreshed_at: None,
            })),
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.client(), config.catalog_refresh)
    }

    /// Models from the last refresh that reached the daemon. Empty if never
    /// refreshed, and also empty after a refresh that found no models
    /// installed (see [`refresh`](Self::refresh)).
    pub fn list(&self) -> Arc<[Model]> {
        self.snapshot.read().models.clone()
    }

    /// Look up a model in the current snapshot.
    pub fn find(&self, id: &str) -> Option<Model> {
        self.snapshot
            .read()
            .models
            .iter()
            .find(|m| m.matches(id))
            .cloned()
    }

    pub fn last_refreshed(&self) -> Option<Instant> {
        self.snapshot.read().refreshed_at
    }

    /// Whether the cached set is older than the refresh interval.
    pub fn is_stale(&self) -> bool {
        match self.last_refreshed() {
            Some(at) => at.elapsed() >= self.stale_after,
            None => true,
        }
    }

    /// Fetch the installed models and swap them into the cache.
    ///
    /// An answer with zero models also replaces the cache (the daemon has
    /// nothing installed any more) and is reported as
    /// [`CatalogError::EmptyCatalog`]. Other failures keep the previous set.
    pub async fn refresh(&self) -> Result<Arc<[Model]>, CatalogError> {
        let refresh = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight catalog refresh");
                    existing.clone()
                }
                None => {
                    let fresh =
                        fetch(self.client.clone(), self.snapshot.clone()).boxed().shared();
                    *in_flight = Some(fresh.clone());
                    fresh
                }
            }
        };

        let outcome = refresh.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|f| f.ptr_eq(&refresh)) {
            *in_flight = None;
        }

        outcome
    }

    /// Refresh only if the cache is stale.
    pub async fn ensure_fresh(&self) -> Result<Arc<[Model]>, CatalogError> {
        if self.is_stale() {
            self.refresh().await
        } else {
            Ok(self.list())
        }
    }

    #[cfg(test)]
    pub(crate) fn seed(&self, models: Vec<Model>) {
        let mut snapshot = self.snapshot.write();
        snapshot.models = Arc::from(models);
        snapshot.refreshed_at = Some(Instant::now());
    }

    /// Refresh on the configured cadence until the handle is aborted.
    pub fn spawn_refresh_loop(&self) -> JoinHandle<()> {
        let catalog = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(catalog.stale_after);
            loop {
                ticker.tick().await;
                if let Err(e) = catalog.refresh().await {
                    warn!(error = %e, "Background catalog refresh failed");
                }
            }
        })
    }
}

async fn fetch(
    client: DaemonClient,
    snapshot: Arc<RwLock<Snapshot>>,
) -> Result<Arc<[Model]>, CatalogError> {
    client
        .check_health()
        .await
        .map_err(|_| CatalogError::Unreachable(client.base_url().to_string()))?;

    let installed = client.list_models().await.map_err(|e| match e {
        ClientError::Unreachable(url) => CatalogError::Unreachable(url),
        other => CatalogError::Failed(other.to_string()),
    })?;

    let models: Arc<[Model]> = installed.into_iter().map(Model::from).collect();

    {
        let mut snapshot = snapshot.write();
        snapshot.models = models.clone();
        snapshot.refreshed_at = Some(Instant::now());
    }

    if models.is_empty() {
        info!(
            url = %client.base_url(),
            "No models installed, install with: ollama pull <model-name>"
        );
        return Err(CatalogError::EmptyCatalog);
    }

    info!(count = models.len(), "Model catalog refreshed");
    Ok(models)
}

impl std::fmt::Debug for ModelCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCatalog")
            .field("base_url", &self.client.base_url())
            .field("stale_after", &self.stale_after)
            .field("models", &self.list().len())
            .finish()
    }
}
