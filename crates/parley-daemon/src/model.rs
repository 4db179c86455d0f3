//! Installed-model listing returned by `GET /api/tags`.

use serde::Deserialize;

/// One entry of the daemon's tag listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstalledModel {
    /// Model identifier, including tag (e.g. `llama2:latest`).
    pub name: String,
    /// Size on disk in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub details: Option<ModelDetails>,
}

/// Optional metadata the daemon reports per model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub parameter_size: Option<String>,
}

/// Response from the tags endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub(crate) models: Vec<InstalledModel>,
}
