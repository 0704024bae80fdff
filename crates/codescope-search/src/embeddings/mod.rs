//! Embedding provider abstraction
//!
//! Three providers share one contract:
//! - [`OpenAiProvider`] — remote HTTP API (`/v1/embeddings`)
//! - [`LocalProvider`] — in-process Candle inference, lazy model download
//! - [`OllamaProvider`] — local HTTP daemon with model keep-alive
//!
//! Batching, retry/backoff and secret redaction live in [`BatchedEmbedder`],
//! which wraps any provider; providers themselves only perform one raw
//! embedding call per invocation.

mod batch;
pub mod local;
pub mod ollama;
pub mod openai;

pub use batch::BatchedEmbedder;
pub use local::LocalProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Static capabilities a provider reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Largest sub-batch the provider accepts in one call.
    pub max_batch_size: usize,
    /// Per-text token budget (≈4 characters per token).
    pub max_tokens_per_text: usize,
    pub requires_network: bool,
    pub supports_gpu: bool,
    pub estimated_latency_ms: u64,
}

/// Embedding provider contract.
///
/// `embed` maps the i-th input to the i-th output vector; implementations
/// must preserve order. Inputs are pre-validated by [`BatchedEmbedder`] and
/// sized within `capabilities().max_batch_size`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. Output length equals input length; every
    /// vector has `dimensions()` elements.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Stable identifier of the provider variant ("openai", "local", "ollama").
    fn provider_id(&self) -> &'static str;

    /// Model identifier in provider-native form.
    fn model_id(&self) -> String;

    /// Output vector dimensionality.
    fn dimensions(&self) -> usize;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Cheap connectivity/readiness probe.
    async fn health_check(&self) -> Result<bool>;
}

/// Provider configuration as it appears in config files and CLI options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `openai`, `local` (aliases `transformers`, `transformersjs`), `ollama`.
    pub provider: String,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Ollama keep-alive duration (e.g. "5m").
    pub keep_alive: Option<String>,
    /// Local model cache override.
    pub model_path: Option<PathBuf>,
}

/// Instantiate a provider from settings.
///
/// Unknown provider strings fail validation; recognized aliases for the
/// in-process provider are `local`, `transformers` and `transformersjs`.
pub fn create_provider(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.provider.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(openai::OpenAiConfig::from_settings(
            settings,
        ))?)),
        "local" | "transformers" | "transformersjs" => {
            Ok(Arc::new(LocalProvider::from_settings(settings)?))
        }
        "ollama" => Ok(Arc::new(OllamaProvider::new(ollama::OllamaConfig::from_settings(
            settings,
        ))?)),
        other => Err(SearchError::Validation(format!(
            "unknown embedding provider '{other}' (expected openai, local or ollama)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_fails_validation() {
        let settings = EmbeddingSettings {
            provider: "bedrock".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&settings),
            Err(SearchError::Validation(_))
        ));
    }

    #[test]
    fn local_aliases_are_recognized() {
        for alias in ["local", "transformers", "transformersjs"] {
            let settings = EmbeddingSettings {
                provider: alias.into(),
                ..Default::default()
            };
            let provider = create_provider(&settings).unwrap();
            assert_eq!(provider.provider_id(), "local");
        }
    }

    #[test]
    fn openai_and_ollama_are_recognized() {
        let openai = create_provider(&EmbeddingSettings {
            provider: "openai".into(),
            api_key: Some("sk-test".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(openai.provider_id(), "openai");

        let ollama = create_provider(&EmbeddingSettings {
            provider: "ollama".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ollama.provider_id(), "ollama");
    }
}
