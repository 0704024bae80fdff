//! Local in-process embedding provider using Candle.
//!
//! The first call lazily downloads the model artifacts from the HuggingFace
//! Hub (cache hit on later runs), loads the weights and warms the tokenizer.
//! Inference runs on a blocking task so the async executor is never pinned.
//!
//! GPU acceleration via compile-time features:
//! - `--features metal` for macOS Metal/MPS
//! - `--features cuda` for NVIDIA CUDA

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::jina_bert::{BertModel as JinaBertModel, Config as JinaConfig};
use hf_hub::{api::sync::Api, Repo, RepoType};
use once_cell::sync::OnceCell;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer};
use tracing::{debug, info};

use super::{EmbeddingProvider, EmbeddingSettings, ProviderCapabilities};
use crate::error::{Result, SearchError};

/// Output dimension of the default model.
pub const EMBEDDING_DIM: usize = 768;

/// In-process batch limit.
const MAX_BATCH_SIZE: usize = 32;

/// Per-text token budget.
const MAX_TOKENS_PER_TEXT: usize = 2_048;

/// Data type for model inference.
const DTYPE: DType = DType::F32;

/// Default model on the HuggingFace Hub.
const DEFAULT_MODEL_ID: &str = "jinaai/jina-embeddings-v2-base-en";

/// Local embedding provider.
///
/// `Arc<LocalProviderInner>` gives interior clonability, required to move the
/// provider into `spawn_blocking`. Lazy model state lives in a `OnceCell`, so
/// concurrent first calls initialize at most once.
#[derive(Clone)]
pub struct LocalProvider {
    inner: Arc<LocalProviderInner>,
}

struct LocalProviderInner {
    model: OnceCell<LoadedModel>,
    device: Device,
    model_id: String,
    /// Load from a local directory instead of the hub.
    model_path: Option<PathBuf>,
}

struct LoadedModel {
    model: JinaBertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LocalProvider {
    pub fn new() -> Result<Self> {
        Self::with_model(DEFAULT_MODEL_ID, None)
    }

    pub fn with_model(model_id: impl Into<String>, model_path: Option<PathBuf>) -> Result<Self> {
        let device = select_device()?;
        Ok(Self {
            inner: Arc::new(LocalProviderInner {
                model: OnceCell::new(),
                device,
                model_id: model_id.into(),
                model_path,
            }),
        })
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let model_id = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
        Self::with_model(model_id, settings.model_path.clone())
    }

    /// Whether the model is resident in memory.
    pub fn is_loaded(&self) -> bool {
        self.inner.model.get().is_some()
    }

    /// Preload the model; useful before a large ingest.
    pub async fn warmup(&self) -> Result<()> {
        let provider = self.clone();
        let start = Instant::now();
        tokio::task::spawn_blocking(move || provider.ensure_model().map(|_| ()))
            .await
            .map_err(|e| SearchError::Embedding(format!("warmup task panicked: {e}")))??;
        info!("local provider warmup complete in {:?}", start.elapsed());
        Ok(())
    }

    fn ensure_model(&self) -> Result<&LoadedModel> {
        self.inner.model.get_or_try_init(|| {
            load_model(
                &self.inner.model_id,
                self.inner.model_path.as_deref(),
                &self.inner.device,
            )
        })
    }

    fn embed_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        debug!("encoding {} texts with local model", texts.len());
        let loaded = self.ensure_model()?;
        encode_with_model(&loaded.model, &loaded.tokenizer, &loaded.device, &texts)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || provider.embed_sync(&texts))
            .await
            .map_err(|e| SearchError::Embedding(format!("blocking task panicked: {e}")))?
    }

    fn provider_id(&self) -> &'static str {
        "local"
    }

    fn model_id(&self) -> String {
        self.inner.model_id.clone()
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            max_batch_size: MAX_BATCH_SIZE,
            max_tokens_per_text: MAX_TOKENS_PER_TEXT,
            // Network is only touched on the first artifact download.
            requires_network: false,
            supports_gpu: cfg!(any(feature = "metal", feature = "cuda")),
            estimated_latency_ms: 50,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        if self.is_loaded() {
            return Ok(true);
        }
        if let Some(ref path) = self.inner.model_path {
            return Ok(path.join("model.safetensors").exists());
        }
        let model_id = self.inner.model_id.clone();
        let reachable = tokio::task::spawn_blocking(move || model_available(&model_id))
            .await
            .map_err(|e| SearchError::Embedding(format!("health task panicked: {e}")))?;
        Ok(reachable)
    }
}

impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProvider")
            .field("model_id", &self.inner.model_id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Select the best available device: Metal > CUDA > CPU.
fn select_device() -> Result<Device> {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("using Metal/MPS GPU acceleration");
                return Ok(device);
            }
            Err(e) => debug!("Metal not available: {e}"),
        }
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("using CUDA GPU acceleration");
                return Ok(device);
            }
            Err(e) => debug!("CUDA not available: {e}"),
        }
    }

    info!("using CPU for local embeddings");
    Ok(Device::Cpu)
}

fn model_available(model_id: &str) -> bool {
    let Ok(api) = Api::new() else {
        return false;
    };
    let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
    api.repo(repo).info().is_ok()
}

/// Resolve artifact paths: local directory if configured, else hub download
/// (cached by hf-hub after the first fetch).
fn artifact_paths(
    model_id: &str,
    model_path: Option<&std::path::Path>,
) -> Result<(PathBuf, PathBuf, PathBuf)> {
    if let Some(dir) = model_path {
        return Ok((
            dir.join("config.json"),
            dir.join("tokenizer.json"),
            dir.join("model.safetensors"),
        ));
    }

    let api =
        Api::new().map_err(|e| SearchError::Embedding(format!("failed to create HF API: {e}")))?;
    let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
    let api_repo = api.repo(repo);

    let config = api_repo
        .get("config.json")
        .map_err(|e| SearchError::Embedding(format!("failed to download config.json: {e}")))?;
    let tokenizer = api_repo
        .get("tokenizer.json")
        .map_err(|e| SearchError::Embedding(format!("failed to download tokenizer.json: {e}")))?;
    let weights = api_repo
        .get("model.safetensors")
        .map_err(|e| SearchError::Embedding(format!("failed to download model.safetensors: {e}")))?;
    Ok((config, tokenizer, weights))
}

fn load_model(
    model_id: &str,
    model_path: Option<&std::path::Path>,
    device: &Device,
) -> Result<LoadedModel> {
    info!("loading local embedding model ({model_id})...");
    let (config_path, tokenizer_path, weights_path) = artifact_paths(model_id, model_path)?;

    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| SearchError::Embedding(format!("failed to read config: {e}")))?;
    let config: JinaConfig = serde_json::from_str(&config_str)
        .map_err(|e| SearchError::Embedding(format!("failed to parse config: {e}")))?;

    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| SearchError::Embedding(format!("failed to load tokenizer: {e}")))?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, device)
            .map_err(|e| SearchError::Embedding(format!("failed to load weights: {e}")))?
    };

    let model = JinaBertModel::new(vb, &config)
        .map_err(|e| SearchError::Embedding(format!("failed to create model: {e}")))?;

    info!("local embedding model loaded (dim={EMBEDDING_DIM})");
    Ok(LoadedModel {
        model,
        tokenizer,
        device: device.clone(),
    })
}

/// L2 normalize embeddings.
fn normalize_l2(v: &Tensor) -> Result<Tensor> {
    v.broadcast_div(&v.sqr()?.sum_keepdim(1)?.sqrt()?)
        .map_err(|e| SearchError::Embedding(format!("L2 normalization failed: {e}")))
}

/// Mean pooling with attention mask.
fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;
    let sum_mask = mask.sum(1)?;
    let summed = embeddings.broadcast_mul(&mask)?.sum(1)?;
    summed
        .broadcast_div(&sum_mask)
        .map_err(|e| SearchError::Embedding(format!("mean pooling failed: {e}")))
}

fn encode_with_model(
    model: &JinaBertModel,
    tokenizer: &Tokenizer,
    device: &Device,
    texts: &[&str],
) -> Result<Vec<Vec<f32>>> {
    let mut tokenizer = tokenizer.clone();
    let padding = PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    };
    tokenizer.with_padding(Some(padding));

    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| SearchError::Embedding(format!("tokenization failed: {e}")))?;

    let token_ids: Vec<Tensor> = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_ids().to_vec().as_slice(), device))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SearchError::Embedding(format!("failed to create token tensor: {e}")))?;

    let attention_masks: Vec<Tensor> = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_attention_mask().to_vec().as_slice(), device))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SearchError::Embedding(format!("failed to create attention mask: {e}")))?;

    let token_ids = Tensor::stack(&token_ids, 0)
        .map_err(|e| SearchError::Embedding(format!("failed to stack tokens: {e}")))?;
    let attention_mask = Tensor::stack(&attention_masks, 0)
        .map_err(|e| SearchError::Embedding(format!("failed to stack masks: {e}")))?;

    let embeddings = model
        .forward(&token_ids)
        .map_err(|e| SearchError::Embedding(format!("forward pass failed: {e}")))?;

    let pooled = mean_pool(&embeddings, &attention_mask)?;
    let normalized = normalize_l2(&pooled)?;

    (0..normalized.dim(0)?)
        .map(|i| normalized.get(i)?.to_vec1::<f32>().map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_report_small_batches() {
        let provider = LocalProvider::new().unwrap();
        let caps = provider.capabilities();
        assert_eq!(caps.max_batch_size, 32);
        assert!(!caps.requires_network);
        assert_eq!(provider.dimensions(), EMBEDDING_DIM);
        assert_eq!(provider.provider_id(), "local");
    }

    #[test]
    fn model_is_not_loaded_until_first_call() {
        let provider = LocalProvider::new().unwrap();
        assert!(!provider.is_loaded());
    }

    #[tokio::test]
    async fn health_check_with_missing_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            LocalProvider::with_model("custom", Some(dir.path().to_path_buf())).unwrap();
        assert!(!provider.health_check().await.unwrap());
    }
}
