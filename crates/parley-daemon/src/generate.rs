//! Wire types for `POST /api/generate`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Request body for the generate endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: GenerateOptions,
}

/// Sampling options forwarded to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    /// Maximum number of tokens to generate.
    pub num_predict: u32,
}

impl GenerateRequest {
    /// Create a streaming request with default options.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: true,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            num_predict: 2000,
        }
    }
}

/// One line of a generate response, streaming or not.
#[derive(Debug, Deserialize)]
pub(crate) struct GenerateLine {
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) response: String,
    #[serde(default)]
    pub(crate) done: Option<bool>,
    #[serde(default)]
    pub(crate) done_reason: Option<String>,
    #[serde(default)]
    pub(crate) eval_count: Option<u64>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

/// Why generation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Natural end of the answer.
    Stop,
    /// Token limit reached.
    Length,
    Other(String),
}

impl StopReason {
    /// Map the daemon's `done_reason`. Older daemons omit it; that means a
    /// natural stop.
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            None | Some("stop") => StopReason::Stop,
            Some("length") => StopReason::Length,
            Some(other) => StopReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Stop => f.write_str("stop"),
            StopReason::Length => f.write_str("length"),
            StopReason::Other(reason) => f.write_str(reason),
        }
    }
}

/// One incremental unit of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub delta: String,
    pub is_final: bool,
    /// Set on the final chunk only.
    pub stop_reason: Option<StopReason>,
    /// Number of generated tokens, reported on the final chunk.
    pub eval_count: Option<u64>,
}

impl Chunk {
    /// A non-final chunk carrying `delta`.
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            is_final: false,
            stop_reason: None,
            eval_count: None,
        }
    }

    /// A final chunk.
    pub fn last(delta: impl Into<String>, stop_reason: StopReason) -> Self {
        Self {
            delta: delta.into(),
            is_final: true,
            stop_reason: Some(stop_reason),
            eval_count: None,
        }
    }
}

/// Result of a non-streaming generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub stop_reason: StopReason,
    pub eval_count: Option<u64>,
}
