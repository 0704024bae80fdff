//! Semantic search over the vector store.
//!
//! Validates query parameters, embeds the query text, fans out over the
//! requested repositories' collections and merges ranked hits. Snippets are
//! truncated to 500 characters at the last whitespace boundary.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::BatchedEmbedder;
use crate::error::{Result, SearchError};
use crate::schema::collection_name;
use crate::store::{SearchFilter, VectorStore};

/// Longest accepted query.
pub const MAX_QUERY_LEN: usize = 1_000;

/// Largest accepted result limit.
pub const MAX_LIMIT: usize = 50;

/// Snippet budget in characters.
const MAX_SNIPPET_CHARS: usize = 500;

/// Search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Repositories to search. Empty means caller-resolved "all".
    pub repositories: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub threshold: f32,
    pub file_extension: Option<String>,
}

fn default_limit() -> usize {
    10
}

/// One formatted search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: String,
    pub repository: String,
    pub file_path: String,
    pub chunk_index: u32,
    pub start_line: u32,
    pub end_line: u32,
    pub similarity: f32,
    pub snippet: String,
}

/// Search response with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub total_matches: usize,
    pub repositories_searched: Vec<String>,
    pub query_time_ms: u64,
}

/// Semantic search service over C2.
pub struct SemanticSearch {
    store: Arc<VectorStore>,
    embedder: BatchedEmbedder,
}

impl SemanticSearch {
    pub fn new(store: Arc<VectorStore>, embedder: BatchedEmbedder) -> Self {
        Self { store, embedder }
    }

    /// Run a validated semantic search across the requested repositories.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        validate_request(&request)?;
        let start = Instant::now();

        let query_vector = self
            .embedder
            .embed(vec![request.query.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Embedding("empty embedding result".into()))?;

        let mut all_hits = Vec::new();
        let mut searched = Vec::new();

        for repo in &request.repositories {
            searched.push(repo.clone());
            let collection = collection_name(repo);
            if !self.store.collection_exists(&collection).await? {
                debug!("collection '{collection}' missing, skipping");
                continue;
            }
            let filter = SearchFilter {
                repository: Some(repo.clone()),
                file_extension: request.file_extension.clone(),
                file_path: None,
            };
            let hits = self
                .store
                .similarity_search(
                    &collection,
                    query_vector.clone(),
                    request.limit as u64,
                    request.threshold,
                    Some(filter),
                )
                .await?;
            all_hits.extend(hits);
        }

        // Merge across repositories: similarity descending, doc id ascending.
        all_hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        all_hits.truncate(request.limit);

        let results: Vec<SearchResult> = all_hits
            .into_iter()
            .map(|hit| SearchResult {
                doc_id: hit.doc_id,
                repository: hit.repository,
                file_path: hit.file_path,
                chunk_index: hit.chunk_index,
                start_line: hit.chunk_start_line,
                end_line: hit.chunk_end_line,
                similarity: hit.score,
                snippet: truncate_snippet(&hit.content),
            })
            .collect();

        Ok(SearchResponse {
            metadata: SearchMetadata {
                total_matches: results.len(),
                repositories_searched: searched,
                query_time_ms: start.elapsed().as_millis() as u64,
            },
            results,
        })
    }
}

fn validate_request(request: &SearchRequest) -> Result<()> {
    let query_len = request.query.chars().count();
    if query_len == 0 {
        return Err(SearchError::Validation("query must not be empty".into()));
    }
    if query_len > MAX_QUERY_LEN {
        return Err(SearchError::Validation(format!(
            "query exceeds {MAX_QUERY_LEN} characters"
        )));
    }
    if request.limit == 0 || request.limit > MAX_LIMIT {
        return Err(SearchError::Validation(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    if !(0.0..=1.0).contains(&request.threshold) {
        return Err(SearchError::Validation(
            "threshold must be between 0 and 1".into(),
        ));
    }
    Ok(())
}

/// Truncate to 500 characters at the last whitespace, appending `"..."` when
/// cut; shorter content passes through verbatim.
pub fn truncate_snippet(content: &str) -> String {
    if content.chars().count() <= MAX_SNIPPET_CHARS {
        return content.to_string();
    }
    let cut_byte = content
        .char_indices()
        .nth(MAX_SNIPPET_CHARS)
        .map(|(b, _)| b)
        .unwrap_or(content.len());
    let window = &content[..cut_byte];
    let boundary = window.rfind(char::is_whitespace).unwrap_or(cut_byte);
    let mut out = window[..boundary].trim_end().to_string();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str, limit: usize, threshold: f32) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            repositories: vec!["r1".into()],
            limit,
            threshold,
            file_extension: None,
        }
    }

    #[test]
    fn query_length_boundaries() {
        assert!(validate_request(&request("a", 10, 0.0)).is_ok());
        assert!(validate_request(&request(&"q".repeat(1000), 10, 0.0)).is_ok());
        assert!(validate_request(&request("", 10, 0.0)).is_err());
        assert!(validate_request(&request(&"q".repeat(1001), 10, 0.0)).is_err());
    }

    #[test]
    fn limit_boundaries() {
        assert!(validate_request(&request("q", 1, 0.0)).is_ok());
        assert!(validate_request(&request("q", 50, 0.0)).is_ok());
        assert!(validate_request(&request("q", 0, 0.0)).is_err());
        assert!(validate_request(&request("q", 51, 0.0)).is_err());
    }

    #[test]
    fn threshold_boundaries() {
        assert!(validate_request(&request("q", 10, 0.0)).is_ok());
        assert!(validate_request(&request("q", 10, 1.0)).is_ok());
        assert!(validate_request(&request("q", 10, -0.01)).is_err());
        assert!(validate_request(&request("q", 10, 1.01)).is_err());
    }

    #[test]
    fn short_snippets_pass_through() {
        assert_eq!(truncate_snippet("short content"), "short content");
    }

    #[test]
    fn long_snippets_cut_at_whitespace_with_ellipsis() {
        let content = "word ".repeat(200);
        let snippet = truncate_snippet(&content);
        assert!(snippet.ends_with("..."));
        let body = snippet.trim_end_matches("...");
        assert!(body.chars().count() <= 500);
        // Cut lands on a word boundary, never mid-word.
        assert!(body.ends_with("word"));
    }

    #[test]
    fn snippet_at_exactly_500_chars_is_verbatim() {
        let content = "x".repeat(500);
        assert_eq!(truncate_snippet(&content), content);
    }
}
