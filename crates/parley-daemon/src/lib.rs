//! Client for an Ollama-compatible model-serving daemon.
//!
//! This crate covers the wire side of Parley: health checks, the installed
//! model listing, and generation requests whose answers arrive either whole
//! or as a stream of newline-delimited JSON chunks.

mod client;
mod error;
mod generate;
mod model;
mod stream;

use std::time::Duration;

pub use client::DaemonClient;
pub use error::ClientError;
pub use generate::{Chunk, Completion, GenerateOptions, GenerateRequest, StopReason};
pub use model::{InstalledModel, ModelDetails};
pub use stream::ChunkStream;

/// Default daemon URL.
pub const DEFAULT_DAEMON_URL: &str = "http://localhost:11434";

/// Default time to wait for the next piece of a response.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default request timeout for health checks.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
