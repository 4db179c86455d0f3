//! HTTP client for the daemon's health, tags and generate endpoints.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::generate::{Completion, GenerateLine, GenerateRequest, StopReason};
use crate::model::{InstalledModel, TagsResponse};
use crate::stream::ChunkStream;
use crate::{DEFAULT_DAEMON_URL, DEFAULT_HEALTH_TIMEOUT, DEFAULT_IDLE_TIMEOUT};

/// Client for communicating with the model-serving daemon.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: reqwest::Client,
    base_url: String,
    idle_timeout: Duration,
    health_timeout: Duration,
}

impl DaemonClient {
    /// Create a new client with the default URL (localhost:11434).
    pub fn new() -> Self {
        Self::with_url(DEFAULT_DAEMON_URL)
    }

    /// Create a new client with a custom URL.
    pub fn with_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Set how long to wait for the next piece of data before giving up.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the request timeout used by health checks.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if the daemon is running. Any 2xx from `GET /` counts.
    pub async fn check_health(&self) -> Result<(), ClientError> {
        let response = self
            .client
            .get(self.url("/"))
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "Health check failed");
                ClientError::Unreachable(self.base_url.clone())
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            debug!(status = %response.status(), "Health check returned non-success");
            Err(ClientError::Unreachable(self.base_url.clone()))
        }
    }

    /// List installed models.
    pub async fn list_models(&self) -> Result<Vec<InstalledModel>, ClientError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.idle_timeout)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::ServerError {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let tags: TagsResponse = serde_json::from_slice(&body)?;
        debug!(count = tags.models.len(), "Listed installed models");
        Ok(tags.models)
    }

    /// Generate a complete answer in one response.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<Completion, ClientError> {
        let request = request.clone().with_stream(false);
        let response = self.post_generate(&request).await?;

        let body = tokio::time::timeout(self.idle_timeout, response.bytes())
            .await
            .map_err(|_| ClientError::Timeout(self.idle_timeout))??;

        let text = String::from_utf8_lossy(&body);
        let line: GenerateLine = serde_json::from_str(text.trim())
            .map_err(|_| ClientError::MalformedResponse(text.trim().to_string()))?;

        if let Some(error) = line.error {
            return Err(ClientError::DaemonError(error));
        }

        Ok(Completion {
            text: line.response,
            stop_reason: StopReason::from_wire(line.done_reason.as_deref()),
            eval_count: line.eval_count,
        })
    }

    /// Generate an answer as a stream of chunks.
    pub async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<ChunkStream, ClientError> {
        let request = request.clone().with_stream(true);
        let response = self.post_generate(&request).await?;
        Ok(ChunkStream::decode(
            response.bytes_stream(),
            self.idle_timeout,
        ))
    }

    async fn post_generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<reqwest::Response, ClientError> {
        info!(
            model = %request.model,
            stream = request.stream,
            "Sending generate request"
        );
        debug!(
            temperature = request.options.temperature,
            num_predict = request.options.num_predict,
            prompt_len = request.prompt.len(),
            "Generate options"
        );

        let send = self.client.post(self.url("/api/generate")).json(request).send();
        let response = tokio::time::timeout(self.idle_timeout, send)
            .await
            .map_err(|_| ClientError::Timeout(self.idle_timeout))?
            .map_err(|e| self.classify_send_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::ModelNotFound(request.model.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::ServerError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    fn classify_send_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_connect() {
            ClientError::Unreachable(self.base_url.clone())
        } else if e.is_timeout() {
            ClientError::Timeout(self.idle_timeout)
        } else {
            ClientError::Http(e)
        }
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A URL nothing listens on.
    fn dead_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    #[test]
    fn test_default_url() {
        let client = DaemonClient::new();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = DaemonClient::with_url("http://192.168.1.100:11434/");
        assert_eq!(client.base_url(), "http://192.168.1.100:11434");
        assert_eq!(client.url("/api/tags"), "http://192.168.1.100:11434/api/tags");
    }

    #[tokio::test]
    async fn test_health_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ollama is running"))
            .mount(&server)
            .await;

        let client = DaemonClient::with_url(server.uri());
        assert!(client.check_health().await.is_ok());
    }

    #[tokio::test]
    async fn test_health_unreachable() {
        let client = DaemonClient::with_url(dead_url());
        assert!(matches!(
            client.check_health().await,
            Err(ClientError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama2", "size": 1}, {"name": "mistral"}]
            })))
            .mount(&server)
            .await;

        let client = DaemonClient::with_url(server.uri());
        let models = client.list_models().await.unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["llama2", "mistral"]);
    }

    #[tokio::test]
    async fn test_generate_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"model\":\"llama2\",\"response\":\"Hel\",\"done\":false}\n",
            "{\"model\":\"llama2\",\"response\":\"lo\",\"done\":false}\n",
            "{\"model\":\"llama2\",\"response\":\"\",\"done\":true,\"eval_count\":2}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "llama2", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = DaemonClient::with_url(server.uri());
        let stream = client
            .generate_stream(&GenerateRequest::new("llama2", "user: hi\nassistant:"))
            .await
            .unwrap();

        let chunks: Vec<_> = stream.collect().await;
        let text: String = chunks
            .iter()
            .map(|c| c.as_ref().unwrap().delta.clone())
            .collect();
        assert_eq!(text, "Hello");
        assert_eq!(chunks.last().unwrap().as_ref().unwrap().eval_count, Some(2));
    }

    #[tokio::test]
    async fn test_generate_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama2",
                "response": "Hello there",
                "done": true,
                "done_reason": "length"
            })))
            .mount(&server)
            .await;

        let client = DaemonClient::with_url(server.uri());
        let completion = client
            .generate(&GenerateRequest::new("llama2", "hi"))
            .await
            .unwrap();
        assert_eq!(completion.text, "Hello there");
        assert_eq!(completion.stop_reason, StopReason::Length);
    }

    #[tokio::test]
    async fn test_generate_model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "model not found"})),
            )
            .mount(&server)
            .await;

        let client = DaemonClient::with_url(server.uri());
        let err = client
            .generate_stream(&GenerateRequest::new("phi3", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ModelNotFound(ref m) if m == "phi3"));
    }

    #[tokio::test]
    async fn test_generate_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = DaemonClient::with_url(server.uri());
        let err = client
            .generate(&GenerateRequest::new("llama2", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ServerError { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_generate_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>\n"))
            .mount(&server)
            .await;

        let client = DaemonClient::with_url(server.uri());
        let mut stream = client
            .generate_stream(&GenerateRequest::new("llama2", "hi"))
            .await
            .unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Err(ClientError::MalformedResponse(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"response\":\"\",\"done\":true}\n")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client =
            DaemonClient::with_url(server.uri()).with_idle_timeout(Duration::from_millis(50));
        let err = client
            .generate_stream(&GenerateRequest::new("llama2", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_generate_unreachable() {
        let client = DaemonClient::with_url(dead_url());
        let err = client
            .generate(&GenerateRequest::new("llama2", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unreachable(_)));
    }
}
