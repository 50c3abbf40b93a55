//! Ollama API client
//!
//! Typed client for the local inference endpoint. This is the only place
//! that knows the wire contract: `GET /api/tags` for the model list,
//! `POST /api/generate` for single-shot generation, and `POST /api/pull`
//! for the newline-delimited JSON model download stream.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default base URL of the local runtime
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Ollama client errors
#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for OllamaError {
    fn from(e: reqwest::Error) -> Self {
        OllamaError::Network(e.to_string())
    }
}

/// One line of the `/api/pull` NDJSON stream
///
/// Every field is optional; lines carry whichever subset the runtime
/// chose to report. A `status == "success"` line is the terminal
/// success token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullEvent {
    pub status: Option<String>,
    pub error: Option<String>,
    pub completed: Option<u64>,
    pub total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
}

/// HTTP client for the local Ollama endpoint
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Client against [`DEFAULT_BASE_URL`]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Client against an explicit base URL (used by tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        // No overall request timeout: generation latency is model-bound
        // and pulls run for minutes. Only connecting is bounded.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `GET /api/tags`: names of locally available models
    pub async fn list_tags(&self) -> Result<Vec<String>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.http.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OllamaError::Api(status.as_u16(), "tag listing failed".to_string()));
        }

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| OllamaError::Parse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// `POST /api/generate`: single-shot, non-streamed generation
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OllamaError::Api(status.as_u16(), "generation failed".to_string()));
        }

        let generated: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| OllamaError::Parse(e.to_string()))?;
        Ok(generated.response)
    }

    /// `POST /api/pull`: stream a model download
    ///
    /// Invokes `on_event` for every parsed NDJSON line. Resolves `Ok`
    /// only on an explicit `status == "success"` line; an error field or
    /// non-200 status resolves `Err`. Cancelling the token tears down
    /// the connection immediately and returns [`OllamaError::Cancelled`].
    pub async fn pull(
        &self,
        name: &str,
        cancel: &CancellationToken,
        mut on_event: impl FnMut(&PullEvent),
    ) -> Result<(), OllamaError> {
        let url = format!("{}/api/pull", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&PullRequest { name })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OllamaError::Api(status.as_u16(), "pull request rejected".to_string()));
        }

        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(OllamaError::Cancelled),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| OllamaError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Consume complete lines; a partial line stays buffered
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let event: PullEvent = serde_json::from_str(line)
                    .map_err(|e| OllamaError::Parse(e.to_string()))?;

                if let Some(error) = &event.error {
                    return Err(OllamaError::Api(status.as_u16(), error.clone()));
                }

                let succeeded = event.status.as_deref() == Some("success");
                on_event(&event);
                if succeeded {
                    return Ok(());
                }
            }
        }

        Err(OllamaError::Parse(
            "pull stream ended without a success status".to_string(),
        ))
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Seam between the classification pipeline and the generation API
///
/// Object-safe so tests can substitute a scripted backend for the live
/// endpoint.
pub trait GenerateBackend: Send + Sync {
    fn generate<'a>(
        &'a self,
        model: &'a str,
        prompt: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<String, OllamaError>>;
}

impl GenerateBackend for OllamaClient {
    fn generate<'a>(
        &'a self,
        model: &'a str,
        prompt: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<String, OllamaError>> {
        Box::pin(OllamaClient::generate(self, model, prompt))
    }
}
