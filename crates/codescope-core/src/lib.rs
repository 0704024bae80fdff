//! codescope-core - parsing, extraction, scanning and chunking
//!
//! The foundation of the codescope knowledge server:
//!
//! - [`parser`] — extension-dispatched tree-sitter parsing with one capture
//!   query per language, yielding a uniform [`parser::ParseResult`]
//! - [`extract`] — normalization of parse results into graph nodes and edges
//! - [`model`] — the tagged node/edge data model of the knowledge graph
//! - [`scanner`] — gitignore-aware working tree walking
//! - [`chunker`] — deterministic bounded chunking for embedding

pub mod chunker;
pub mod error;
pub mod extract;
pub mod hash;
pub mod model;
pub mod parser;
pub mod scanner;

// Re-exports
pub use chunker::{chunk_text, Chunk, ChunkBoundary, ChunkConfig};
pub use error::{CoreError, Result};
pub use extract::{extract_fragment, FileFragment, PendingCall, PendingHeritage, PendingReference};
pub use hash::sha256_hex;
pub use model::{
    ClassKind, EdgeProps, EdgeType, GraphEdge, GraphNode, ImportKind, ModuleOrigin, NodeLabel,
    RepoStatus,
};
pub use parser::{
    Language, ParseResult, ParserLimits, ParserRouter, ParsedCall, ParsedEntity, ParsedImport,
};
pub use scanner::{ScanConfig, ScannedFile, Scanner};
