//! Batching and retry wrapper over any embedding provider.
//!
//! Splits input into sub-batches of the provider's `max_batch_size`, retries
//! each sub-batch with exponential backoff (honoring `Retry-After` on rate
//! limits), preserves input order across sub-batch boundaries, and scrubs
//! secrets from every surfaced error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{EmbeddingProvider, ProviderCapabilities};
use crate::error::{Result, SearchError};
use crate::redact::redact;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default retry budget per sub-batch.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Order-preserving, retrying embedder.
#[derive(Clone)]
pub struct BatchedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    max_retries: u32,
    base_delay: Duration,
}

impl BatchedEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.provider.capabilities()
    }

    /// Embed `texts`, i-th output corresponding to i-th input.
    ///
    /// Fails with a validation error on an empty list, a blank item, or an
    /// item beyond the provider's per-text token budget.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let caps = self.provider.capabilities();
        validate_inputs(&texts, &caps)?;

        let batch_size = caps.max_batch_size.max(1);
        let mut out: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for sub in texts.chunks(batch_size) {
            let vectors = self.embed_sub_batch(sub).await?;
            if vectors.len() != sub.len() {
                return Err(SearchError::Embedding(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    sub.len()
                )));
            }
            out.extend(vectors);
        }

        let expected = self.provider.dimensions();
        if expected > 0 {
            if let Some(bad) = out.iter().find(|v| v.len() != expected) {
                return Err(SearchError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        Ok(out)
    }

    /// One sub-batch, up to `max_retries + 1` attempts.
    async fn embed_sub_batch(&self, sub: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut delay = self.base_delay;
        let mut last_error: Option<SearchError> = None;

        for attempt in 0..=self.max_retries {
            match self.provider.embed(sub.to_vec()).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    if !e.is_retryable() || attempt == self.max_retries {
                        return Err(scrub(e));
                    }
                    let wait = match &e {
                        SearchError::RateLimited {
                            retry_after: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => delay,
                    };
                    warn!(
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        "embedding sub-batch failed transiently: {}",
                        redact(&e.to_string())
                    );
                    tokio::time::sleep(wait).await;
                    delay *= 2;
                    last_error = Some(e);
                }
            }
        }

        Err(scrub(last_error.unwrap_or_else(|| {
            SearchError::ProviderUnavailable("retries exhausted".into())
        })))
    }
}

fn validate_inputs(texts: &[String], caps: &ProviderCapabilities) -> Result<()> {
    if texts.is_empty() {
        return Err(SearchError::Validation("texts must be non-empty".into()));
    }
    let max_chars = caps.max_tokens_per_text.saturating_mul(4);
    for (i, text) in texts.iter().enumerate() {
        if text.trim().is_empty() {
            return Err(SearchError::Validation(format!(
                "text at index {i} is empty or whitespace"
            )));
        }
        if max_chars > 0 && text.chars().count() > max_chars {
            return Err(SearchError::Validation(format!(
                "text at index {i} exceeds provider budget of {} tokens",
                caps.max_tokens_per_text
            )));
        }
    }
    debug!("validated {} texts for embedding", texts.len());
    Ok(())
}

/// Redact the message payload of an error before it escapes the crate.
fn scrub(err: SearchError) -> SearchError {
    match err {
        SearchError::Auth(m) => SearchError::Auth(redact(&m)),
        SearchError::Transient(m) => SearchError::Transient(redact(&m)),
        SearchError::Timeout(m) => SearchError::Timeout(redact(&m)),
        SearchError::ProviderUnavailable(m) => SearchError::ProviderUnavailable(redact(&m)),
        SearchError::Connection(m) => SearchError::Connection(redact(&m)),
        SearchError::Embedding(m) => SearchError::Embedding(redact(&m)),
        SearchError::Validation(m) => SearchError::Validation(redact(&m)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: fails the first `failures` calls, then echoes
    /// per-text vectors encoding the input order.
    struct ScriptedProvider {
        failures: AtomicUsize,
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
        error: fn() -> SearchError,
        max_batch: usize,
    }

    impl ScriptedProvider {
        fn new(failures: usize, error: fn() -> SearchError, max_batch: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                error,
                max_batch,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(texts.len());
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                f.checked_sub(1)
            })
            .is_ok()
            {
                return Err((self.error)());
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 0.0, 0.0])
                .collect())
        }

        fn provider_id(&self) -> &'static str {
            "scripted"
        }

        fn model_id(&self) -> String {
            "test".into()
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                max_batch_size: self.max_batch,
                max_tokens_per_text: 100,
                requires_network: false,
                supports_gpu: false,
                estimated_latency_ms: 1,
            }
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn embedder(provider: Arc<ScriptedProvider>) -> BatchedEmbedder {
        BatchedEmbedder::new(provider)
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn preserves_order_across_sub_batches() {
        let provider = Arc::new(ScriptedProvider::new(
            0,
            || SearchError::Transient("never".into()),
            2,
        ));
        let texts: Vec<String> = vec!["a", "bb", "ccc", "dddd", "eeeee"]
            .into_iter()
            .map(String::from)
            .collect();
        let out = embedder(Arc::clone(&provider)).embed(texts).await.unwrap();
        let lens: Vec<f32> = out.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(
            provider.batch_sizes.lock().unwrap().as_slice(),
            &[2, 2, 1]
        );
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        // Two 429s then success: exactly three provider calls (S6).
        let provider = Arc::new(ScriptedProvider::new(
            2,
            || SearchError::RateLimited { retry_after: None },
            10,
        ));
        let out = embedder(Arc::clone(&provider))
            .embed(vec!["hello".into()])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(
            5,
            || SearchError::Auth("sk-abcdefghijklmnopqrstuvwxyz012345 bad".into()),
            10,
        ));
        let err = embedder(Arc::clone(&provider))
            .embed(vec!["hello".into()])
            .await
            .unwrap_err();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        // Message is scrubbed before surfacing.
        let msg = err.to_string();
        assert!(!msg.contains("sk-abcdefghijklmnopqrstuvwxyz012345"));
        assert!(msg.contains("sk-***"));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error() {
        let provider = Arc::new(ScriptedProvider::new(
            100,
            || SearchError::Transient("reset".into()),
            10,
        ));
        let err = embedder(Arc::clone(&provider))
            .embed(vec!["hello".into()])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // 1 initial + 3 retries.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_list_is_validation() {
        let provider = Arc::new(ScriptedProvider::new(
            0,
            || SearchError::Transient("x".into()),
            10,
        ));
        let err = embedder(provider).embed(vec![]).await.unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
    }

    #[tokio::test]
    async fn blank_item_is_validation() {
        let provider = Arc::new(ScriptedProvider::new(
            0,
            || SearchError::Transient("x".into()),
            10,
        ));
        let err = embedder(provider)
            .embed(vec!["ok".into(), "   ".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
    }

    #[tokio::test]
    async fn oversized_text_is_validation() {
        let provider = Arc::new(ScriptedProvider::new(
            0,
            || SearchError::Transient("x".into()),
            10,
        ));
        // Budget: 100 tokens ≈ 400 chars.
        let err = embedder(provider)
            .embed(vec!["x".repeat(401)])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
    }
}
