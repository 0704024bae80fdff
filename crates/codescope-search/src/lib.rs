//! codescope-search - embedding providers and vector search
//!
//! - [`embeddings`] — the provider abstraction (OpenAI, local Candle,
//!   Ollama) plus the batching/retry/redaction wrapper
//! - [`store`] — the Qdrant vector store client (one collection per repo)
//! - [`search`] — the semantic search service with validation and snippet
//!   formatting
//! - [`redact`] — credential scrubbing applied to every surfaced error

pub mod embeddings;
pub mod error;
pub mod redact;
pub mod schema;
pub mod search;
pub mod store;

// Re-exports
pub use embeddings::{
    create_provider, BatchedEmbedder, EmbeddingProvider, EmbeddingSettings, LocalProvider,
    OllamaProvider, OpenAiProvider, ProviderCapabilities,
};
pub use error::{Result, SearchError};
pub use redact::redact;
pub use schema::{collection_name, doc_id, ChunkDocument, ChunkMetadata, SearchHit};
pub use search::{SearchRequest, SearchResponse, SearchResult, SemanticSearch};
pub use store::{CollectionStats, SearchFilter, VectorStore, VectorStoreConfig};
