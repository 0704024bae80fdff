//! Vector store document schema.
//!
//! One document per chunk. The string document id `{repo}:{path}:{index}` is
//! deterministic and kept in the payload; Qdrant point ids are UUIDv5 hashes
//! of it under a fixed namespace, so upserts are idempotent.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Namespace for deterministic point id derivation. Never change this: point
/// identity across re-ingests depends on it.
const POINT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x1b, 0x4e, 0x28, 0xba, 0x2f, 0xa1, 0x11, 0xd2, 0x88, 0x3f, 0xb9, 0xa7, 0x61, 0xbd, 0xe3,
    0xfb,
]);

/// Payload field names.
pub mod fields {
    pub const DOC_ID: &str = "doc_id";
    pub const FILE_PATH: &str = "file_path";
    pub const REPOSITORY: &str = "repository";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const TOTAL_CHUNKS: &str = "total_chunks";
    pub const FILE_EXTENSION: &str = "file_extension";
    pub const FILE_SIZE_BYTES: &str = "file_size_bytes";
    pub const CHUNK_START_LINE: &str = "chunk_start_line";
    pub const CHUNK_END_LINE: &str = "chunk_end_line";
    pub const CONTENT_HASH: &str = "content_hash";
    pub const INDEXED_AT: &str = "indexed_at";
    pub const FILE_MODIFIED_AT: &str = "file_modified_at";
    pub const CONTENT: &str = "content";
}

/// Collection name for a repository: `repo_{name}` with non-identifier
/// characters flattened to `_`.
pub fn collection_name(repo: &str) -> String {
    let safe: String = repo
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("repo_{safe}")
}

/// Deterministic document id `{repo}:{path}:{chunk_index}`.
pub fn doc_id(repo: &str, file_path: &str, chunk_index: u32) -> String {
    format!("{repo}:{file_path}:{chunk_index}")
}

/// Qdrant point id (UUIDv5 of the document id).
pub fn point_uuid(doc_id: &str) -> Uuid {
    Uuid::new_v5(&POINT_NAMESPACE, doc_id.as_bytes())
}

/// Metadata stored alongside each chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub repository: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_extension: String,
    pub file_size_bytes: u64,
    pub chunk_start_line: u32,
    pub chunk_end_line: u32,
    pub content_hash: String,
    /// RFC 3339 timestamp of ingestion.
    pub indexed_at: String,
    /// RFC 3339 mtime of the source file, when known.
    pub file_modified_at: Option<String>,
}

/// A chunk document ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDocument {
    /// `{repo}:{path}:{chunk_index}`
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl ChunkDocument {
    /// Flatten to the Qdrant payload JSON.
    pub fn payload_json(&self) -> serde_json::Value {
        json!({
            fields::DOC_ID: self.id,
            fields::FILE_PATH: self.metadata.file_path,
            fields::REPOSITORY: self.metadata.repository,
            fields::CHUNK_INDEX: self.metadata.chunk_index,
            fields::TOTAL_CHUNKS: self.metadata.total_chunks,
            fields::FILE_EXTENSION: self.metadata.file_extension,
            fields::FILE_SIZE_BYTES: self.metadata.file_size_bytes,
            fields::CHUNK_START_LINE: self.metadata.chunk_start_line,
            fields::CHUNK_END_LINE: self.metadata.chunk_end_line,
            fields::CONTENT_HASH: self.metadata.content_hash,
            fields::INDEXED_AT: self.metadata.indexed_at,
            fields::FILE_MODIFIED_AT: self.metadata.file_modified_at,
            fields::CONTENT: self.content,
        })
    }
}

/// One similarity search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f32,
    pub content: String,
    pub file_path: String,
    pub repository: String,
    pub chunk_index: u32,
    pub chunk_start_line: u32,
    pub chunk_end_line: u32,
}
