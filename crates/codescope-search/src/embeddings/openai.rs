//! OpenAI-compatible remote embedding provider.
//!
//! POST `{base_url}/v1/embeddings` with bearer auth. Error classification:
//! 401/403 are fatal auth failures, 400/404 are validation, 429 is rate
//! limiting (with `Retry-After` passed through), 408/504 are timeouts, other
//! 5xx are transient. Retrying is the [`super::BatchedEmbedder`]'s job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmbeddingProvider, EmbeddingSettings, ProviderCapabilities};
use crate::error::{Result, SearchError};

/// Default request timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Remote batch limit.
const MAX_BATCH_SIZE: usize = 100;

/// Per-text token budget.
const MAX_TOKENS_PER_TEXT: usize = 8_192;

/// Configuration for the OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL (e.g. "https://api.openai.com/v1").
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Expected dimensionality; 0 means detect from the first response.
    pub dimensions: usize,
    pub timeout_ms: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "text-embedding-3-small".into(),
            dimensions: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl OpenAiConfig {
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        let defaults = Self::default();
        Self {
            base_url: settings.base_url.clone().unwrap_or(defaults.base_url),
            api_key: settings.api_key.clone(),
            model: settings.model.clone().unwrap_or(defaults.model),
            dimensions: settings.dimensions.unwrap_or(0),
            timeout_ms: settings.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

/// OpenAI-compatible embedding provider.
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
    /// Dimension detected from the first successful response.
    dimension: AtomicUsize,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SearchError::ProviderUnavailable(format!("HTTP client error: {e}")))?;
        let dimension = AtomicUsize::new(config.dimensions);
        Ok(Self {
            client,
            config,
            dimension,
        })
    }

    fn embeddings_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/embeddings")
        } else {
            format!("{base}/v1/embeddings")
        }
    }

    async fn send_request(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = self.embeddings_url();
        let body = EmbeddingsRequest {
            model: self.config.model.clone(),
            input: texts,
        };

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout("embedding request timed out".into())
            } else if e.is_connect() {
                SearchError::Connection(format!("connection failed: {e}"))
            } else {
                SearchError::Transient(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let parsed: EmbeddingsResponse = response
                    .json()
                    .await
                    .map_err(|e| SearchError::Transient(format!("invalid response body: {e}")))?;

                // Responses may arrive out of order; re-sort by index.
                let mut data = parsed.data;
                data.sort_by_key(|d| d.index);
                let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

                if let Some(first) = embeddings.first() {
                    let dim = first.len();
                    let cached = self.dimension.load(Ordering::Relaxed);
                    if cached == 0 {
                        self.dimension.store(dim, Ordering::Relaxed);
                        debug!("detected embedding dimension {dim}");
                    } else if cached != dim {
                        return Err(SearchError::DimensionMismatch {
                            expected: cached,
                            actual: dim,
                        });
                    }
                }
                Ok(embeddings)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(SearchError::Auth(format!("status {status}: {body}")))
            }
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                let body = response.text().await.unwrap_or_default();
                Err(SearchError::Validation(format!("status {status}: {body}")))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                Err(SearchError::RateLimited { retry_after })
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Err(SearchError::Timeout(format!("status {status}")))
            }
            s if s.is_server_error() => {
                Err(SearchError::Transient(format!("server error {status}")))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(SearchError::Transient(format!(
                    "unexpected status {status}: {body}"
                )))
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.send_request(texts).await
    }

    fn provider_id(&self) -> &'static str {
        "openai"
    }

    fn model_id(&self) -> String {
        self.config.model.clone()
    }

    fn dimensions(&self) -> usize {
        let detected = self.dimension.load(Ordering::Relaxed);
        if detected > 0 {
            return detected;
        }
        match self.config.model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536,
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            max_batch_size: MAX_BATCH_SIZE,
            max_tokens_per_text: MAX_TOKENS_PER_TEXT,
            requires_network: true,
            supports_gpu: false,
            estimated_latency_ms: 300,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        match self.send_request(vec!["health check".into()]).await {
            Ok(_) => Ok(true),
            // A rate-limited endpoint is reachable.
            Err(SearchError::RateLimited { .. }) => Ok(true),
            Err(e) if e.is_retryable() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("timeout_ms", &self.config.timeout_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_response(dim: usize, count: usize) -> serde_json::Value {
        let data: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "object": "embedding",
                    "embedding": vec![0.1_f32 * (i as f32 + 1.0); dim],
                    "index": i
                })
            })
            .collect();
        serde_json::json!({
            "object": "list",
            "data": data,
            "model": "test-model",
            "usage": {"prompt_tokens": 10, "total_tokens": 10}
        })
    }

    fn test_config(server: &MockServer) -> OpenAiConfig {
        OpenAiConfig {
            base_url: server.uri(),
            api_key: Some("test-key".into()),
            model: "test-model".into(),
            dimensions: 0,
            timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn embed_success_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response(768, 2)))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(test_config(&server)).unwrap();
        let out = provider
            .embed(vec!["one".into(), "two".into()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 768);
    }

    #[tokio::test]
    async fn auth_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(test_config(&server)).unwrap();
        let err = provider.embed(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, SearchError::Auth(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "42")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(test_config(&server)).unwrap();
        match provider.embed(vec!["x".into()]).await {
            Err(SearchError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(42));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(test_config(&server)).unwrap();
        let err = provider.embed(vec!["x".into()]).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn bad_request_is_validation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(test_config(&server)).unwrap();
        let err = provider.embed(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
    }

    #[tokio::test]
    async fn dimension_is_detected_and_enforced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response(1536, 1)))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(test_config(&server)).unwrap();
        assert_eq!(provider.dimensions(), 1536);
        provider.embed(vec!["x".into()]).await.unwrap();
        assert_eq!(provider.dimensions(), 1536);
    }

    #[tokio::test]
    async fn out_of_order_indices_are_restored() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "object": "list",
            "data": [
                {"object": "embedding", "embedding": [2.0_f32], "index": 1},
                {"object": "embedding", "embedding": [1.0_f32], "index": 0}
            ],
            "model": "test-model"
        });
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(test_config(&server)).unwrap();
        let out = provider.embed(vec!["a".into(), "b".into()]).await.unwrap();
        assert_eq!(out, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn url_handles_v1_suffix() {
        let mut config = OpenAiConfig::default();
        config.base_url = "https://api.openai.com/v1".into();
        let provider = OpenAiProvider::new(config).unwrap();
        assert_eq!(
            provider.embeddings_url(),
            "https://api.openai.com/v1/embeddings"
        );

        let mut config = OpenAiConfig::default();
        config.base_url = "http://localhost:8080".into();
        let provider = OpenAiProvider::new(config).unwrap();
        assert_eq!(
            provider.embeddings_url(),
            "http://localhost:8080/v1/embeddings"
        );
    }
}
