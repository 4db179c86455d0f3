//! Chat session: one conversation with one selected model.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use parley_daemon::{ClientError, StopReason};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ModelCatalog;
use crate::config::{RelayConfig, ResetPolicy};
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::generation::{CompletionHandle, Generate, GenerationClient};
use crate::session_config::{ConfigError, ConfigUpdate, SessionConfig};
use crate::transcript::{Interruption, Role, Transcript, Turn};

const EVENT_CAPACITY: usize = 256;

/// Where a session is in its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    Cancelling,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::AwaitingResponse => f.write_str("awaiting response"),
            SessionState::Cancelling => f.write_str("cancelling"),
        }
    }
}

/// Notifications for whatever renders the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A request was sent.
    Started { model: String },
    /// New assistant text, in arrival order.
    Delta(String),
    Completed {
        stop_reason: StopReason,
        eval_count: Option<u64>,
    },
    Cancelled,
    Failed(String),
    /// Settings changed; carries the new settings.
    ConfigChanged(SessionConfig),
    Reset,
}

/// How a submitted message ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        stop_reason: StopReason,
        eval_count: Option<u64>,
    },
    Cancelled,
}

/// Result of [`ChatSession::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// The sealed assistant turn. `None` when cancelled before any text
    /// arrived.
    pub turn: Option<Turn>,
    pub outcome: Outcome,
}

impl Reply {
    pub fn text(&self) -> &str {
        self.turn.as_ref().map_or("", |t| t.content.as_str())
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == Outcome::Cancelled
    }
}

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A response is still being generated. Wait for it or cancel it first")]
    SessionBusy,
    #[error("No response is being generated")]
    NotGenerating,
    #[error("No model selected. Pick one of the installed models first")]
    NoModelSelected,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

struct Inner {
    state: SessionState,
    config: SessionConfig,
    transcript: Transcript,
    cancel: Option<CancellationToken>,
    /// Incremented per submit; lets a dropped submit tell whether the
    /// session has moved on to another request.
    request: u64,
}

/// A conversation with the daemon.
///
/// All operations take `&self`; share the session as `Arc<ChatSession>`
/// to cancel from another task while a submit is running. At most one
/// request is in flight per session.
pub struct ChatSession {
    generator: Arc<dyn Generate>,
    catalog: ModelCatalog,
    monitor: Option<ConnectivityMonitor>,
    defaults: SessionConfig,
    reset_policy: ResetPolicy,
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    /// Create a session. `config` is also what
    /// [`ResetPolicy::RestoreDefaults`] restores.
    pub fn new(generator: Arc<dyn Generate>, catalog: ModelCatalog, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            generator,
            catalog,
            monitor: None,
            defaults: config.clone(),
            reset_policy: ResetPolicy::default(),
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                config,
                transcript: Transcript::new(),
                cancel: None,
                request: 0,
            }),
            state,
            events,
        }
    }

    /// Daemon-backed session using the relay's URL, timeouts and reset
    /// policy.
    pub fn from_config(
        relay: &RelayConfig,
        catalog: ModelCatalog,
        monitor: ConnectivityMonitor,
        config: SessionConfig,
    ) -> Self {
        Self::new(Arc::new(GenerationClient::from_config(relay)), catalog, config)
            .with_monitor(monitor)
            .with_reset_policy(relay.reset_policy)
    }

    /// Check connectivity before each request.
    pub fn with_monitor(mut self, monitor: ConnectivityMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_reset_policy(mut self, policy: ResetPolicy) -> Self {
        self.reset_policy = policy;
        self
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Receiver that always holds the current state.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the conversation so far.
    pub fn transcript(&self) -> Transcript {
        self.inner.lock().transcript.clone()
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> SessionConfig {
        self.inner.lock().config.clone()
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn reset_policy(&self) -> ResetPolicy {
        self.reset_policy
    }

    /// Send a user message and wait for the answer.
    ///
    /// Deltas are published as [`SessionEvent::Delta`] while streaming. A
    /// cancelled request returns `Ok` with [`Outcome::Cancelled`]; a failed
    /// one returns the error, with any partial text kept in the transcript.
    pub async fn submit(&self, text: impl Into<String>) -> Result<Reply, SessionError> {
        let text = text.into();
        let (request, token, transcript, config) = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Idle {
                return Err(SessionError::SessionBusy);
            }
            if inner.config.model_id().is_empty() {
                return Err(SessionError::NoModelSelected);
            }

            inner.transcript.push(Role::User, text);
            inner.request += 1;
            let token = CancellationToken::new();
            inner.cancel = Some(token.clone());
            self.set_state(&mut inner, SessionState::AwaitingResponse);
            self.emit(SessionEvent::Started {
                model: inner.config.model_id().to_string(),
            });

            (
                inner.request,
                token,
                inner.transcript.clone(),
                inner.config.clone(),
            )
        };

        info!(
            model = %config.model_id(),
            turns = transcript.len(),
            stream = config.streaming_enabled(),
            "Submitting message"
        );

        let _guard = AbandonGuard {
            session: self,
            request,
        };
        self.drive(&token, &transcript, &config).await
    }

    /// Stop the request in flight and wait until the session is idle.
    ///
    /// Text received so far stays in the transcript, marked as cancelled.
    /// The running [`submit`](Self::submit) must still be polled for the
    /// session to settle.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        let mut state = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::AwaitingResponse {
                return Err(SessionError::NotGenerating);
            }
            if let Some(token) = &inner.cancel {
                token.cancel();
            }
            self.set_state(&mut inner, SessionState::Cancelling);
            self.state.subscribe()
        };

        info!("Cancelling generation");
        while *state.borrow_and_update() != SessionState::Idle {
            if state.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Clear the conversation. Settings follow the session's
    /// [`ResetPolicy`].
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Idle {
            return Err(SessionError::SessionBusy);
        }

        inner.transcript.clear();
        if self.reset_policy == ResetPolicy::RestoreDefaults {
            inner.config = self.defaults.clone();
        }
        self.emit(SessionEvent::Reset);
        info!(policy = ?self.reset_policy, "Session reset");
        Ok(())
    }

    /// Validate and apply a settings change. A request already in flight
    /// keeps the settings it started with.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<SessionConfig, SessionError> {
        let models = self.catalog.list();
        let mut inner = self.inner.lock();
        inner.config.update(update, &models)?;
        let config = inner.config.clone();
        self.emit(SessionEvent::ConfigChanged(config.clone()));
        debug!(?update, "Session config updated");
        Ok(config)
    }

    async fn drive(
        &self,
        token: &CancellationToken,
        transcript: &Transcript,
        config: &SessionConfig,
    ) -> Result<Reply, SessionError> {
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(self.finish_cancelled()),
            opened = self.open(transcript, config) => opened,
        };

        let mut stream = match opened {
            Ok(CompletionHandle::Complete(completion)) => {
                self.append(&completion.text);
                return Ok(self.finish_completed(completion.stop_reason, completion.eval_count));
            }
            Ok(CompletionHandle::Streaming(stream)) => stream,
            Err(e) => return Err(self.finish_failed(e)),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(self.finish_cancelled()),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if !chunk.delta.is_empty() {
                        self.append(&chunk.delta);
                    }
                    if chunk.is_final {
                        let stop_reason = chunk.stop_reason.unwrap_or(StopReason::Stop);
                        return Ok(self.finish_completed(stop_reason, chunk.eval_count));
                    }
                }
                Some(Err(e)) => return Err(self.finish_failed(e)),
                None => {
                    return Err(self.finish_failed(ClientError::ProtocolError(
                        "stream ended before the final chunk".to_string(),
                    )))
                }
            }
        }
    }

    /// Advisory health check, then the request itself.
    async fn open(
        &self,
        transcript: &Transcript,
        config: &SessionConfig,
    ) -> Result<CompletionHandle, ClientError> {
        let observed = match &self.monitor {
            Some(monitor) => monitor.check().await,
            None => ConnectivityState::Unknown,
        };
        if observed == ConnectivityState::Unreachable {
            warn!("Daemon failed its health check, sending the request anyway");
        }

        self.generator
            .generate(transcript, config)
            .await
            .map_err(|e| match &self.monitor {
                Some(monitor)
                    if observed == ConnectivityState::Unreachable
                        && e.is_transport()
                        && !matches!(e, ClientError::Unreachable(_)) =>
                {
                    ClientError::Unreachable(monitor.base_url().to_string())
                }
                _ => e,
            })
    }

    fn append(&self, delta: &str) {
        let mut inner = self.inner.lock();
        // Chunks still arriving after a cancel are dropped.
        if inner.state != SessionState::AwaitingResponse {
            return;
        }
        inner.transcript.extend_provisional(delta);
        self.emit(SessionEvent::Delta(delta.to_string()));
    }

    fn finish_completed(&self, stop_reason: StopReason, eval_count: Option<u64>) -> Reply {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Cancelling {
            drop(inner);
            return self.finish_cancelled();
        }

        let turn = inner.transcript.complete();
        inner.cancel = None;
        self.set_state(&mut inner, SessionState::Idle);
        self.emit(SessionEvent::Completed {
            stop_reason: stop_reason.clone(),
            eval_count,
        });
        info!(chars = turn.content.len(), %stop_reason, "Response complete");

        Reply {
            turn: Some(turn),
            outcome: Outcome::Completed {
                stop_reason,
                eval_count,
            },
        }
    }

    fn finish_cancelled(&self) -> Reply {
        let mut inner = self.inner.lock();
        let turn = inner.transcript.interrupt(Interruption::Cancelled);
        inner.cancel = None;
        self.set_state(&mut inner, SessionState::Idle);
        self.emit(SessionEvent::Cancelled);
        info!(kept_partial = turn.is_some(), "Generation cancelled");

        Reply {
            turn,
            outcome: Outcome::Cancelled,
        }
    }

    fn finish_failed(&self, error: ClientError) -> SessionError {
        let message = error.to_string();
        let mut inner = self.inner.lock();
        let partial = inner
            .transcript
            .interrupt(Interruption::Failed(message.clone()));
        inner.cancel = None;
        self.set_state(&mut inner, SessionState::Idle);
        self.emit(SessionEvent::Failed(message.clone()));
        warn!(error = %message, kept_partial = partial.is_some(), "Generation failed");

        SessionError::Client(error)
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.state.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ChatSession")
            .field("state", &inner.state)
            .field("config", &inner.config)
            .field("turns", &inner.transcript.len())
            .field("reset_policy", &self.reset_policy)
            .finish()
    }
}

/// Returns the session to Idle if a submit future is dropped mid-request.
struct AbandonGuard<'a> {
    session: &'a ChatSession,
    request: u64,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.inner.lock();
        if inner.request != self.request || inner.state == SessionState::Idle {
            return;
        }

        debug!(request = self.request, "Submit dropped before completion");
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        inner.transcript.interrupt(Interruption::Cancelled);
        self.session.set_state(&mut inner, SessionState::Idle);
        self.session.emit(SessionEvent::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use parley_daemon::{Chunk, ChunkStream, Completion, DaemonClient};

    use crate::catalog::Model;

    type Script = Result<CompletionHandle, ClientError>;

    /// Generator that answers from a queue and records what it was asked.
    struct Scripted {
        answers: Mutex<VecDeque<Script>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl Generate for Scripted {
        async fn generate(
            &self,
            transcript: &Transcript,
            config: &SessionConfig,
        ) -> Result<CompletionHandle, ClientError> {
            let request = GenerationClient::build_request(transcript, config);
            self.prompts.lock().push(request.prompt);
            self.answers
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::DaemonError("script exhausted".into())))
        }
    }

    fn chunks(items: Vec<Result<Chunk, ClientError>>) -> Script {
        Ok(CompletionHandle::Streaming(ChunkStream::new(stream::iter(items))))
    }

    /// A stream that yields `first` and then never ends.
    fn stalled(first: &str) -> Script {
        let items = stream::iter(vec![Ok(Chunk::text(first))]).chain(stream::pending());
        Ok(CompletionHandle::Streaming(ChunkStream::new(items)))
    }

    fn ndjson(body: &str) -> Script {
        let body = stream::iter(vec![Ok::<_, ClientError>(Bytes::from(body.to_string()))]);
        Ok(CompletionHandle::Streaming(ChunkStream::decode(
            body,
            Duration::from_secs(5),
        )))
    }

    fn catalog() -> ModelCatalog {
        let catalog = ModelCatalog::new(DaemonClient::new(), Duration::from_secs(30));
        catalog.seed(vec![Model::new("llama2:latest"), Model::new("mistral")]);
        catalog
    }

    fn session(generator: Arc<Scripted>) -> Arc<ChatSession> {
        Arc::new(ChatSession::new(
            generator,
            catalog(),
            SessionConfig::with_model("llama2"),
        ))
    }

    async fn next_delta(events: &mut broadcast::Receiver<SessionEvent>) -> String {
        loop {
            if let SessionEvent::Delta(text) = events.recv().await.unwrap() {
                return text;
            }
        }
    }

    #[tokio::test]
    async fn test_streamed_reply_concatenates_deltas() {
        let generator = Scripted::new(vec![ndjson(
            "{\"model\":\"llama2\",\"response\":\"Hel\",\"done\":false}\n\
             {\"model\":\"llama2\",\"response\":\"lo\",\"done\":false}\n\
             {\"model\":\"llama2\",\"response\":\"\",\"done\":true,\"done_reason\":\"stop\",\"eval_count\":2}\n",
        )]);
        let session = session(generator);
        let mut events = session.subscribe();

        let reply = session.submit("Say hello").await.unwrap();

        assert_eq!(reply.text(), "Hello");
        assert_eq!(
            reply.outcome,
            Outcome::Completed {
                stop_reason: StopReason::Stop,
                eval_count: Some(2)
            }
        );
        assert_eq!(session.state(), SessionState::Idle);

        let transcript = session.transcript();
        let turns = transcript.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "Say hello");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "Hello");
        assert!(turns[1].interruption.is_none());

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Started {
                model: "llama2".to_string()
            }
        );
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Delta("Hel".into()));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Delta("lo".into()));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_non_streaming_reply() {
        let generator = Scripted::new(vec![Ok(CompletionHandle::Complete(Completion {
            text: "Hi there".to_string(),
            stop_reason: StopReason::Stop,
            eval_count: None,
        }))]);
        let session = session(generator);

        let reply = session.submit("hi").await.unwrap();
        assert_eq!(reply.text(), "Hi there");
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_prompt_includes_history() {
        let generator = Scripted::new(vec![
            chunks(vec![Ok(Chunk::last("Hello!", StopReason::Stop))]),
            chunks(vec![Ok(Chunk::last("Fine.", StopReason::Stop))]),
        ]);
        let session = session(generator.clone());

        session.submit("hi").await.unwrap();
        session.submit("how are you?").await.unwrap();

        let prompts = generator.prompts.lock().clone();
        assert_eq!(
            prompts[1],
            "You are a helpful AI assistant.\n\n\
             user: hi\nassistant: Hello!\nuser: how are you?\nassistant:"
        );
    }

    #[tokio::test]
    async fn test_submit_without_model() {
        let generator = Scripted::new(vec![]);
        let session = ChatSession::new(generator.clone(), catalog(), SessionConfig::default());

        let err = session.submit("hi").await.unwrap_err();
        assert!(matches!(err, SessionError::NoModelSelected));
        assert!(session.transcript().is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_submit_while_busy() {
        let generator = Scripted::new(vec![stalled("par")]);
        let session = session(generator);
        let mut events = session.subscribe();

        let running = tokio::spawn({
            let session = session.clone();
            async move { session.submit("first").await }
        });
        next_delta(&mut events).await;

        let err = session.submit("second").await.unwrap_err();
        assert!(matches!(err, SessionError::SessionBusy));
        let user_turns = session
            .transcript()
            .turns()
            .iter()
            .filter(|t| t.role == Role::User)
            .count();
        assert_eq!(user_turns, 1);

        session.cancel().await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_text() {
        let generator = Scripted::new(vec![stalled("Once upon")]);
        let session = session(generator);
        let mut events = session.subscribe();

        let running = tokio::spawn({
            let session = session.clone();
            async move { session.submit("tell me a story").await }
        });
        assert_eq!(next_delta(&mut events).await, "Once upon");
        assert_eq!(session.state(), SessionState::AwaitingResponse);

        session.cancel().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        let reply = running.await.unwrap().unwrap();
        assert!(reply.is_cancelled());
        let turn = reply.turn.unwrap();
        assert_eq!(turn.content, "Once upon");
        assert_eq!(turn.interruption, Some(Interruption::Cancelled));
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_when_idle() {
        let session = session(Scripted::new(vec![]));
        assert!(matches!(
            session.cancel().await,
            Err(SessionError::NotGenerating)
        ));
    }

    #[tokio::test]
    async fn test_dropped_submit_returns_to_idle() {
        let generator = Scripted::new(vec![stalled("abc")]);
        let session = session(generator);
        let mut events = session.subscribe();

        let running = tokio::spawn({
            let session = session.clone();
            async move { session.submit("go").await }
        });
        next_delta(&mut events).await;
        running.abort();
        let _ = running.await;

        assert_eq!(session.state(), SessionState::Idle);
        let transcript = session.transcript();
        assert_eq!(
            transcript.last().unwrap().interruption,
            Some(Interruption::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_failure_mid_stream_keeps_partial_text() {
        let generator = Scripted::new(vec![chunks(vec![
            Ok(Chunk::text("Partial ")),
            Ok(Chunk::text("answer")),
            Err(ClientError::Timeout(Duration::from_secs(60))),
        ])]);
        let session = session(generator);

        let err = session.submit("hi").await.unwrap_err();
        assert!(matches!(err, SessionError::Client(ClientError::Timeout(_))));
        assert_eq!(session.state(), SessionState::Idle);

        let transcript = session.transcript();
        let last = transcript.last().unwrap();
        assert_eq!(last.content, "Partial answer");
        assert!(matches!(last.interruption, Some(Interruption::Failed(_))));
    }

    #[tokio::test]
    async fn test_malformed_first_line_leaves_no_partial_turn() {
        let generator = Scripted::new(vec![ndjson("this is not json\n")]);
        let session = session(generator);

        let err = session.submit("hi").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Client(ClientError::MalformedResponse(_))
        ));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.last().unwrap().role, Role::User);
        assert!(transcript.provisional().is_none());
    }

    #[tokio::test]
    async fn test_request_error_before_stream() {
        let generator = Scripted::new(vec![Err(ClientError::ModelNotFound("llama2".into()))]);
        let session = session(generator);
        let mut events = session.subscribe();

        let err = session.submit("hi").await.unwrap_err();
        assert!(matches!(err, SessionError::Client(ClientError::ModelNotFound(_))));
        assert_eq!(session.transcript().len(), 1);

        let mut failed = None;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Failed(message) = event {
                failed = Some(message);
            }
        }
        assert!(failed.unwrap().contains("ollama pull llama2"));
    }

    #[tokio::test]
    async fn test_unreachable_monitor_is_advisory() {
        let generator = Scripted::new(vec![chunks(vec![Ok(Chunk::last("ok", StopReason::Stop))])]);
        let monitor = ConnectivityMonitor::new(
            DaemonClient::with_url("http://127.0.0.1:9").with_health_timeout(Duration::from_millis(200)),
            Duration::from_secs(10),
        );
        let session = ChatSession::new(
            generator.clone(),
            catalog(),
            SessionConfig::with_model("llama2"),
        )
        .with_monitor(monitor.clone());

        let reply = session.submit("hi").await.unwrap();
        assert_eq!(reply.text(), "ok");
        assert_eq!(generator.calls(), 1);
        assert_eq!(monitor.current().state, ConnectivityState::Unreachable);
    }

    #[tokio::test]
    async fn test_transport_failure_while_unreachable_is_reported_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hang up on every connection.
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let relay = RelayConfig::default().with_base_url(format!("http://{}", addr));
        let monitor = ConnectivityMonitor::from_config(&relay);
        let session = ChatSession::from_config(
            &relay,
            catalog(),
            monitor.clone(),
            SessionConfig::with_model("llama2"),
        );

        let err = session.submit("hi").await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::Client(ClientError::Unreachable(_))
        ));
        assert_eq!(monitor.current().state, ConnectivityState::Unreachable);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_chunks_after_cancel_are_discarded() {
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let rest = stream::once(async move {
            let _ = gate.await;
            stream::iter(vec![
                Ok(Chunk::text("b")),
                Ok(Chunk::last("", StopReason::Stop)),
            ])
        })
        .flatten();
        let items = stream::iter(vec![Ok::<_, ClientError>(Chunk::text("a"))]).chain(rest);
        let generator = Scripted::new(vec![Ok(CompletionHandle::Streaming(ChunkStream::new(
            items,
        )))]);
        let session = session(generator);
        let mut events = session.subscribe();

        let running = tokio::spawn({
            let session = session.clone();
            async move { session.submit("go").await }
        });
        assert_eq!(next_delta(&mut events).await, "a");

        let cancelling = tokio::spawn({
            let session = session.clone();
            async move { session.cancel().await }
        });
        let mut state = session.watch_state();
        state
            .wait_for(|state| *state != SessionState::AwaitingResponse)
            .await
            .unwrap();
        let _ = release.send(());

        cancelling.await.unwrap().unwrap();
        let reply = running.await.unwrap().unwrap();

        assert_eq!(reply.outcome, Outcome::Cancelled);
        assert_eq!(reply.text(), "a");
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.transcript().last().unwrap().content, "a");

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(
                event,
                SessionEvent::Delta(_) | SessionEvent::Completed { .. }
            ));
        }
    }

    #[test]
    fn test_final_chunk_while_cancelling_ends_cancelled() {
        let session = session(Scripted::new(vec![]));
        {
            let mut inner = session.inner.lock();
            inner.transcript.push(Role::User, "go");
            inner.transcript.extend_provisional("a");
            session.set_state(&mut inner, SessionState::Cancelling);
        }

        session.append("b");
        let reply = session.finish_completed(StopReason::Stop, Some(2));

        assert_eq!(reply.outcome, Outcome::Cancelled);
        assert_eq!(reply.text(), "a");
        assert_eq!(
            reply.turn.unwrap().interruption,
            Some(Interruption::Cancelled)
        );
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_update_config() {
        let session = session(Scripted::new(vec![]));

        let config = session
            .update_config(&ConfigUpdate::new().model("mistral").temperature(2.0))
            .unwrap();
        assert_eq!(config.model_id(), "mistral");
        assert_eq!(session.config().temperature(), 2.0);

        let err = session
            .update_config(&ConfigUpdate::new().temperature(2.5))
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::InvalidField { .. })));
        assert_eq!(session.config().temperature(), 2.0);

        let err = session
            .update_config(&ConfigUpdate::new().model("phi3"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::UnknownModel(_))));
        assert_eq!(session.config().model_id(), "mistral");
    }

    #[tokio::test]
    async fn test_reset_keeps_config_by_default() {
        let generator = Scripted::new(vec![chunks(vec![Ok(Chunk::last("hey", StopReason::Stop))])]);
        let session = session(generator);
        session
            .update_config(&ConfigUpdate::new().temperature(1.5))
            .unwrap();
        session.submit("hi").await.unwrap();

        session.reset().unwrap();

        assert!(session.transcript().is_empty());
        assert_eq!(session.config().temperature(), 1.5);
        assert_eq!(session.reset_policy(), ResetPolicy::KeepConfig);
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let session = ChatSession::new(
            Scripted::new(vec![]),
            catalog(),
            SessionConfig::with_model("llama2"),
        )
        .with_reset_policy(ResetPolicy::RestoreDefaults);
        session
            .update_config(&ConfigUpdate::new().model("mistral").system_prompt("Be brief."))
            .unwrap();

        session.reset().unwrap();

        assert_eq!(session.config(), SessionConfig::with_model("llama2"));
    }

    #[tokio::test]
    async fn test_reset_while_busy() {
        let generator = Scripted::new(vec![stalled("x")]);
        let session = session(generator);
        let mut events = session.subscribe();

        let running = tokio::spawn({
            let session = session.clone();
            async move { session.submit("go").await }
        });
        next_delta(&mut events).await;

        assert!(matches!(session.reset(), Err(SessionError::SessionBusy)));
        assert_eq!(session.transcript().len(), 1);

        session.cancel().await.unwrap();
        running.await.unwrap().unwrap();
    }
}
