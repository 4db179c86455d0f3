//! Incremental decoding of newline-delimited JSON generate responses.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::generate::{Chunk, GenerateLine, StopReason};

/// Longest excerpt of an offending line kept in error messages.
const EXCERPT_LEN: usize = 200;

/// Longest line buffered while waiting for its newline.
const MAX_LINE_LEN: usize = 4 * 1024 * 1024;

/// Lazy, finite, non-restartable sequence of generated chunks.
///
/// The stream ends after the final chunk. Data arriving after it, or the
/// body ending before it, is reported as [`ClientError::ProtocolError`].
/// Any error ends the stream.
pub struct ChunkStream {
    inner: BoxStream<'static, Result<Chunk, ClientError>>,
}

impl ChunkStream {
    /// Wrap an already-decoded chunk sequence, enforcing the final-chunk
    /// protocol on it.
    pub fn new<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Chunk, ClientError>> + Send + 'static,
    {
        let guarded = async_stream::stream! {
            let mut chunks = Box::pin(chunks);
            let mut finished = false;

            while let Some(item) = chunks.next().await {
                match item {
                    Ok(_) if finished => {
                        yield Err(ClientError::ProtocolError(
                            "chunk received after the final chunk".to_string(),
                        ));
                        return;
                    }
                    Ok(chunk) => {
                        finished = chunk.is_final;
                        yield Ok(chunk);
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if !finished {
                yield Err(ClientError::ProtocolError(
                    "stream ended before the final chunk".to_string(),
                ));
            }
        };

        Self {
            inner: Box::pin(guarded),
        }
    }

    /// Decode a raw NDJSON body. Every read from `body` must complete
    /// within `idle_timeout`.
    pub fn decode<S, E>(body: S, idle_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<ClientError> + Send + 'static,
    {
        let chunks = async_stream::stream! {
            let mut body = Box::pin(body);
            let mut decoder = LineDecoder::default();

            loop {
                let next = match tokio::time::timeout(idle_timeout, body.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        yield Err(ClientError::Timeout(idle_timeout));
                        return;
                    }
                };

                let at_end = next.is_none();
                let lines = match next {
                    Some(Ok(data)) => match decoder.push(&data) {
                        Ok(lines) => lines,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                    Some(Err(e)) => {
                        yield Err(e.into());
                        return;
                    }
                    None => decoder.finish(),
                };

                for line in lines {
                    match decoder.parse(&line) {
                        Ok(Some(chunk)) => yield Ok(chunk),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                if at_end {
                    debug!(lines = decoder.lines_seen, "Response body finished");
                    return;
                }
            }
        };

        Self::new(chunks)
    }
}

impl Stream for ChunkStream {
    type Item = Result<Chunk, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream").finish_non_exhaustive()
    }
}

/// Splits a byte stream into lines and parses each one independently.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: Vec<u8>,
    lines_seen: usize,
    /// Model named by the first chunk; later chunks must match it.
    model: Option<String>,
}

impl LineDecoder {
    /// Feed bytes, returning every line completed by them. A partial line
    /// longer than [`MAX_LINE_LEN`] is rejected.
    fn push(&mut self, data: &[u8]) -> Result<Vec<String>, ClientError> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&raw).trim().to_string());
        }

        if self.buffer.len() > MAX_LINE_LEN {
            let kept = self.buffer.len();
            self.buffer.clear();
            return Err(ClientError::MalformedResponse(format!(
                "line exceeds {} bytes without a newline ({} buffered)",
                MAX_LINE_LEN, kept
            )));
        }
        Ok(lines)
    }

    /// Flush a trailing line that had no newline.
    fn finish(&mut self) -> Vec<String> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let raw = std::mem::take(&mut self.buffer);
        vec![String::from_utf8_lossy(&raw).trim().to_string()]
    }

    /// Parse one line. `Ok(None)` means the line carried nothing usable and
    /// was skipped.
    fn parse(&mut self, line: &str) -> Result<Option<Chunk>, ClientError> {
        if line.is_empty() {
            return Ok(None);
        }

        self.lines_seen += 1;
        let first = self.lines_seen == 1;

        let parsed = match serde_json::from_str::<GenerateLine>(line) {
            Ok(parsed) if parsed.error.is_some() || parsed.done.is_some() => parsed,
            Ok(_) | Err(_) if first => {
                return Err(ClientError::MalformedResponse(excerpt(line)));
            }
            Ok(_) | Err(_) => {
                warn!(line = %excerpt(line), "Skipping unparseable stream line");
                return Ok(None);
            }
        };

        if let Some(error) = parsed.error {
            return Err(ClientError::DaemonError(error));
        }

        if let Some(model) = parsed.model {
            match &self.model {
                None => self.model = Some(model),
                Some(expected) if *expected != model => {
                    return Err(ClientError::ProtocolError(format!(
                        "chunk for model '{}' inside a stream for '{}'",
                        model, expected
                    )));
                }
                Some(_) => {}
            }
        }

        let is_final = parsed.done.unwrap_or(false);
        Ok(Some(Chunk {
            delta: parsed.response,
            is_final,
            stop_reason: is_final.then(|| StopReason::from_wire(parsed.done_reason.as_deref())),
            eval_count: parsed.eval_count,
        }))
    }
}

fn excerpt(line: &str) -> String {
    if line.len() <= EXCERPT_LEN {
        return line.to_string();
    }
    let mut end = EXCERPT_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}
