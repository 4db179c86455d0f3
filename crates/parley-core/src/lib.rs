//! # Parley core
//!
//! Chat sessions against a local model-serving daemon.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   ChatSession   │ --> │ GenerationClient│ --> │  DaemonClient   │
//! │ (state machine) │     │ (prompt render) │     │ (parley-daemon) │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!          │                                               │
//!    ┌─────┴─────────┐                           ┌─────────┴─────────┐
//!    │ ModelCatalog  │                           │ ConnectivityMonitor│
//!    └───────────────┘                           └───────────────────┘
//! ```
//!
//! The catalog and the monitor are process-wide and cheap to clone; each
//! session owns its transcript and settings.
//!
//! ## Usage
//!
//! ```ignore
//! use parley_core::{ChatSession, ConnectivityMonitor, ModelCatalog, RelayConfig, SessionConfig};
//!
//! let relay = RelayConfig::from_env();
//! let catalog = ModelCatalog::from_config(&relay);
//! let models = catalog.refresh().await?;
//!
//! let session = ChatSession::from_config(
//!     &relay,
//!     catalog,
//!     ConnectivityMonitor::from_config(&relay),
//!     SessionConfig::with_model(&models[0].id),
//! );
//! let reply = session.submit("Why is the sky blue?").await?;
//! ```

mod catalog;
mod config;
mod connectivity;
mod generation;
mod prompt;
mod session;
mod session_config;
mod transcript;

pub use catalog::{display_name, CatalogError, Model, ModelCatalog};
pub use config::{
    RelayConfig, RelayConfigBuilder, ResetPolicy, DEFAULT_CATALOG_REFRESH, DEFAULT_HEALTH_INTERVAL,
};
pub use connectivity::{
    ConnectivityEvent, ConnectivityMonitor, ConnectivityState, ConnectivityStatus,
};
pub use generation::{CompletionHandle, Generate, GenerationClient};
pub use prompt::{render_prompt, ASSISTANT_CUE};
pub use session::{ChatSession, Outcome, Reply, SessionError, SessionEvent, SessionState};
pub use session_config::{
    ConfigError, ConfigUpdate, SessionConfig, DEFAULT_MAX_TOKENS, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TEMPERATURE, TEMPERATURE_RANGE,
};
pub use transcript::{Interruption, Role, Transcript, Turn};

// Wire types callers need alongside the session API.
pub use parley_daemon::{ClientError, StopReason};
