//! Turning a transcript and settings into a generate request.

use async_trait::async_trait;
use parley_daemon::{ChunkStream, ClientError, Completion, DaemonClient, GenerateRequest};
use tracing::debug;

use crate::config::RelayConfig;
use crate::prompt::render_prompt;
use crate::session_config::SessionConfig;
use crate::transcript::Transcript;

/// Answer of a generate call: whole, or as a chunk stream.
#[derive(Debug)]
pub enum CompletionHandle {
    Complete(Completion),
    Streaming(ChunkStream),
}

/// Something that can answer a transcript.
///
/// [`GenerationClient`] is the daemon-backed implementation; sessions hold
/// a `dyn Generate` so other backends can stand in.
#[async_trait]
pub trait Generate: Send + Sync {
    /// Send one generate request for `transcript` under `config`. The
    /// streaming flag of `config` picks the handle variant.
    async fn generate(
        &self,
        transcript: &Transcript,
        config: &SessionConfig,
    ) -> Result<CompletionHandle, ClientError>;
}

/// Daemon-backed [`Generate`].
#[derive(Debug, Clone)]
pub struct GenerationClient {
    client: DaemonClient,
}

impl GenerationClient {
    pub fn new(client: DaemonClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.client())
    }

    pub fn client(&self) -> &DaemonClient {
        &self.client
    }

    /// The request that [`Generate::generate`] sends.
    pub fn build_request(transcript: &Transcript, config: &SessionConfig) -> GenerateRequest {
        let prompt = render_prompt(config.system_prompt(), transcript.turns());
        GenerateRequest::new(config.model_id(), prompt)
            .with_stream(config.streaming_enabled())
            .with_options(config.options())
    }
}

#[async_trait]
impl Generate for GenerationClient {
    async fn generate(
        &self,
        transcript: &Transcript,
        config: &SessionConfig,
    ) -> Result<CompletionHandle, ClientError> {
        let request = Self::build_request(transcript, config);
        debug!(turns = transcript.len(), "Rendered prompt");

        if request.stream {
            let stream = self.client.generate_stream(&request).await?;
            Ok(CompletionHandle::Streaming(stream))
        } else {
            let completion = self.client.generate(&request).await?;
            Ok(CompletionHandle::Complete(completion))
        }
    }
}
