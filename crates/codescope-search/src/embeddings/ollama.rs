//! Ollama daemon embedding provider.
//!
//! Talks to a local Ollama instance: `POST /api/embed` for embeddings and
//! `GET /api/tags` as the health probe. The `keep_alive` parameter keeps the
//! model resident between calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{EmbeddingProvider, EmbeddingSettings, ProviderCapabilities};
use crate::error::{Result, SearchError};

/// Default daemon endpoint.
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default embedding model.
const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Default request timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// The daemon is called one text at a time.
const MAX_BATCH_SIZE: usize = 1;

/// Per-text token budget.
const MAX_TOKENS_PER_TEXT: usize = 2_048;

/// Configuration for the Ollama provider.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Keep-alive duration passed on every request (e.g. "5m").
    pub keep_alive: Option<String>,
    pub timeout_ms: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            keep_alive: Some("5m".into()),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl OllamaConfig {
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        let defaults = Self::default();
        Self {
            base_url: settings.base_url.clone().unwrap_or(defaults.base_url),
            model: settings.model.clone().unwrap_or(defaults.model),
            keep_alive: settings.keep_alive.clone().or(defaults.keep_alive),
            timeout_ms: settings.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama daemon provider.
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
    dimension: AtomicUsize,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SearchError::ProviderUnavailable(format!("HTTP client error: {e}")))?;
        Ok(Self {
            client,
            config,
            dimension: AtomicUsize::new(0),
        })
    }

    fn embed_url(&self) -> String {
        format!("{}/api/embed", self.config.base_url.trim_end_matches('/'))
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let body = EmbedRequest {
            model: self.config.model.clone(),
            input: texts.clone(),
            keep_alive: self.config.keep_alive.clone(),
        };

        let response = self
            .client
            .post(self.embed_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout("ollama request timed out".into())
                } else if e.is_connect() {
                    SearchError::Connection(format!("ollama unreachable: {e}"))
                } else {
                    SearchError::Transient(format!("ollama request failed: {e}"))
                }
            })?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let parsed: EmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| SearchError::Transient(format!("invalid response body: {e}")))?;
                if parsed.embeddings.len() != texts.len() {
                    return Err(SearchError::Embedding(format!(
                        "ollama returned {} embeddings for {} inputs",
                        parsed.embeddings.len(),
                        texts.len()
                    )));
                }
                if let Some(first) = parsed.embeddings.first() {
                    let cached = self.dimension.load(Ordering::Relaxed);
                    if cached == 0 {
                        self.dimension.store(first.len(), Ordering::Relaxed);
                    } else if cached != first.len() {
                        return Err(SearchError::DimensionMismatch {
                            expected: cached,
                            actual: first.len(),
                        });
                    }
                }
                Ok(parsed.embeddings)
            }
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                Err(SearchError::Validation(format!(
                    "ollama rejected request ({status}): {body}"
                )))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(SearchError::RateLimited { retry_after: None }),
            s if s.is_server_error() => {
                Err(SearchError::Transient(format!("ollama server error {status}")))
            }
            _ => Err(SearchError::Transient(format!(
                "unexpected ollama status {status}"
            ))),
        }
    }

    fn provider_id(&self) -> &'static str {
        "ollama"
    }

    fn model_id(&self) -> String {
        self.config.model.clone()
    }

    fn dimensions(&self) -> usize {
        let detected = self.dimension.load(Ordering::Relaxed);
        if detected > 0 {
            detected
        } else {
            // nomic-embed-text and most Ollama embedding models are 768-dim.
            768
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            max_batch_size: MAX_BATCH_SIZE,
            max_tokens_per_text: MAX_TOKENS_PER_TEXT,
            requires_network: false,
            supports_gpu: true,
            estimated_latency_ms: 100,
        }
    }

    /// `GET /api/tags` answers 200 when the daemon is up.
    async fn health_check(&self) -> Result<bool> {
        match self.client.get(self.tags_url()).send().await {
            Ok(response) => Ok(response.status() == StatusCode::OK),
            Err(_) => Ok(false),
        }
    }
}

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("keep_alive", &self.config.keep_alive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> OllamaConfig {
        OllamaConfig {
            base_url: server.uri(),
            model: "nomic-embed-text".into(),
            keep_alive: Some("5m".into()),
            timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn embed_sends_keep_alive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(serde_json::json!({
                "model": "nomic-embed-text",
                "keep_alive": "5m"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3]]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(test_config(&server)).unwrap();
        let out = provider.embed(vec!["hello".into()]).await.unwrap();
        assert_eq!(out, vec![vec![0.1, 0.2, 0.3]]);
    }

    #[tokio::test]
    async fn health_check_uses_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": []
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(test_config(&server)).unwrap();
        assert!(provider.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn health_check_false_when_unreachable() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_ms: 500,
            ..OllamaConfig::default()
        };
        let provider = OllamaProvider::new(config).unwrap();
        assert!(!provider.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn missing_model_is_validation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(test_config(&server)).unwrap();
        let err = provider.embed(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1], [0.2]]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(test_config(&server)).unwrap();
        let err = provider.embed(vec!["only one".into()]).await.unwrap_err();
        assert!(matches!(err, SearchError::Embedding(_)));
    }

    #[test]
    fn daemon_batch_size_is_one() {
        let config = OllamaConfig::default();
        let provider = OllamaProvider::new(config).unwrap();
        assert_eq!(provider.capabilities().max_batch_size, 1);
    }
}
