//! codescope configuration management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.codescope/config.toml`
//! - Local config: `.codescope/config.toml` (in the working directory)
//! - CLI overrides via [`ConfigOverrides`]
//!
//! Configuration is merged in order: defaults → global → local → overrides.

mod error;
mod loader;

pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for codescope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CodescopeConfig {
    pub storage: StorageConfig,
    pub vector: VectorConfig,
    pub graph: GraphConfig,
    pub embedding: EmbeddingConfig,
    pub scanner: ScannerConfig,
    pub chunking: ChunkingConfig,
    pub watcher: WatcherConfig,
    pub server: ServerConfig,
}

impl CodescopeConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.chunking.validate()?;
        self.graph.validate()?;
        Ok(())
    }
}

/// Where working trees, the catalog and session state live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory (`repos/{name}` working trees, `metadata.json`).
    pub data_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_path: base.join("codescope"),
        }
    }
}

/// Qdrant connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Neo4j connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 7687,
            username: "neo4j".into(),
            password: "neo4j".into(),
        }
    }
}

impl GraphConfig {
    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "graph.host must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Which embedding provider generates vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Openai,
    #[default]
    Local,
    Ollama,
}

impl EmbeddingProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProviderKind::Openai => "openai",
            EmbeddingProviderKind::Local => "local",
            EmbeddingProviderKind::Ollama => "ollama",
        }
    }
}

impl FromStr for EmbeddingProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(EmbeddingProviderKind::Openai),
            "local" | "transformers" | "transformersjs" => Ok(EmbeddingProviderKind::Local),
            "ollama" => Ok(EmbeddingProviderKind::Ollama),
            other => Err(ConfigError::ValidationError(format!(
                "unknown embedding provider '{other}' (expected openai, local or ollama)"
            ))),
        }
    }
}

impl std::fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Embedding provider settings.
///
/// # Example TOML
///
/// ```toml
/// [embedding]
/// provider = "openai"
/// model = "text-embedding-3-small"
/// api_key_env = "OPENAI_API_KEY"
///
/// # or a local daemon:
/// # provider = "ollama"
/// # model = "nomic-embed-text"
/// # keep_alive = "5m"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    /// Environment variable holding the API key (never the key itself).
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub keep_alive: Option<String>,
    pub model_path: Option<PathBuf>,
}

impl EmbeddingConfig {
    fn validate(&self) -> Result<()> {
        if let Some(dims) = self.dimensions {
            if dims == 0 {
                return Err(ConfigError::ValidationError(
                    "embedding.dimensions must be positive".into(),
                ));
            }
        }
        if self.provider == EmbeddingProviderKind::Openai
            && self.api_key_env.is_none()
            && self.base_url.is_none()
        {
            return Err(ConfigError::ValidationError(
                "embedding.provider is 'openai' but neither api_key_env nor base_url is set"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Resolve the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}

/// Working-tree scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Empty means the built-in language extension set.
    pub include_extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size_bytes: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_extensions: Vec::new(),
            exclude_patterns: Vec::new(),
            max_file_size_bytes: 1024 * 1024,
        }
    }
}

/// Chunker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            overlap_lines: 2,
        }
    }
}

impl ChunkingConfig {
    fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.max_chars must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Folder watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
    pub max_concurrent_watchers: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_concurrent_watchers: 32,
        }
    }
}

/// MCP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the streamable HTTP transport.
    pub http_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8321".into(),
        }
    }
}

/// CLI-level overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_path: Option<PathBuf>,
    pub vector_url: Option<String>,
    pub graph_host: Option<String>,
    pub embedding_provider: Option<EmbeddingProviderKind>,
    pub embedding_model: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut CodescopeConfig) {
        if let Some(ref data_path) = self.data_path {
            config.storage.data_path = data_path.clone();
        }
        if let Some(ref url) = self.vector_url {
            config.vector.url = url.clone();
        }
        if let Some(ref host) = self.graph_host {
            config.graph.host = host.clone();
        }
        if let Some(provider) = self.embedding_provider {
            config.embedding.provider = provider;
        }
        if let Some(ref model) = self.embedding_model {
            config.embedding.model = Some(model.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_validate() {
        CodescopeConfig::default().validate().unwrap();
    }

    #[test]
    fn provider_aliases_parse() {
        assert_eq!(
            "transformersjs".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Local
        );
        assert_eq!(
            "transformers".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Local
        );
        assert_eq!(
            "OLLAMA".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Ollama
        );
        assert!("bedrock".parse::<EmbeddingProviderKind>().is_err());
    }

    #[test]
    fn openai_requires_key_source() {
        let mut config = CodescopeConfig::default();
        config.embedding.provider = EmbeddingProviderKind::Openai;
        assert!(config.validate().is_err());

        config.embedding.api_key_env = Some("OPENAI_API_KEY".into());
        config.validate().unwrap();
    }

    #[test]
    fn zero_dimensions_fail_validation() {
        let mut config = CodescopeConfig::default();
        config.embedding.dimensions = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_apply_last() {
        let mut config = CodescopeConfig::default();
        let overrides = ConfigOverrides {
            vector_url: Some("http://qdrant:6334".into()),
            embedding_provider: Some(EmbeddingProviderKind::Ollama),
            ..Default::default()
        };
        overrides.apply(&mut config);
        assert_eq!(config.vector.url, "http://qdrant:6334");
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Ollama);
    }
}
