//! Error types for daemon operations.

use std::convert::Infallible;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the model-serving daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed for a reason other than connectivity.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Daemon could not be reached at the transport level.
    #[error("Daemon not reachable at {0}. Start it with: ollama serve")]
    Unreachable(String),

    /// Requested model is not installed on the daemon.
    #[error("Model '{0}' not found. Pull it with: ollama pull {0}")]
    ModelNotFound(String),

    /// No data arrived within the idle window.
    #[error("No data from the daemon within {0:?}. The model may still be loading, try again")]
    Timeout(Duration),

    /// The first line of a response could not be parsed.
    #[error("Malformed response from the daemon: {0}")]
    MalformedResponse(String),

    /// The daemon broke the chunk protocol (data after the final chunk, etc).
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Any other non-2xx response.
    #[error("Daemon returned HTTP {status}: {body}")]
    ServerError { status: u16, body: String },

    /// The daemon reported an error inside an otherwise valid response.
    #[error("Daemon error: {0}")]
    DaemonError(String),
}

impl ClientError {
    /// Whether the failure happened at the transport level (connection
    /// refused, reset, DNS) rather than in the protocol.
    pub fn is_transport(&self) -> bool {
        match self {
            ClientError::Unreachable(_) => true,
            ClientError::Http(e) => e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }
}

impl From<Infallible> for ClientError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}
