//! Incremental update coordinator.
//!
//! Computes the `(base, head)` file delta for a repository and applies the
//! per-file mutation protocol to both stores, sequentially per file so the
//! vector store and the graph stay in lockstep: (a) delete old vector docs,
//! (b) delete old graph file scope, (c) insert new graph state, (d) insert
//! new vector docs. `last_indexed_commit` advances only after the delta is
//! applied (I4).
//!
//! A file whose content hash is unchanged is skipped — unless its vector
//! documents are missing, in which case it is re-embedded (recovery from a
//! crash between graph and vector writes).

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use codescope_core::{chunk_text, sha256_hex, ChunkConfig, RepoStatus};
use codescope_graph::{FileInput, GraphIngestionService};
use codescope_search::schema::{collection_name, doc_id};
use codescope_search::{BatchedEmbedder, ChunkDocument, ChunkMetadata, VectorStore};

use crate::catalog::RepositoryCatalog;
use crate::error::{IndexError, Result};
use crate::git::{self, ChangeSet};
use crate::ingestion::{FileError, IndexOptions, IndexOutcome, IngestionService};
use crate::locks::RepoLocks;

/// Update result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    NoChanges,
    Updated,
    UpdatedWithErrors,
    Failed,
}

/// Update statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStats {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub chunks_upserted: usize,
    pub chunks_deleted: usize,
    pub duration_ms: u64,
}

/// Result of one incremental update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub status: UpdateStatus,
    pub repository: String,
    pub commit_sha: String,
    pub commit_message: String,
    pub stats: UpdateStats,
    pub errors: Vec<FileError>,
    pub duration_ms: u64,
}

/// The incremental update coordinator (C9).
pub struct UpdateCoordinator {
    catalog: Arc<Mutex<RepositoryCatalog>>,
    store: Arc<VectorStore>,
    embedder: BatchedEmbedder,
    graph: Arc<GraphIngestionService>,
    ingestion: Arc<IngestionService>,
    locks: RepoLocks,
    chunk: ChunkConfig,
}

impl UpdateCoordinator {
    pub fn new(
        catalog: Arc<Mutex<RepositoryCatalog>>,
        store: Arc<VectorStore>,
        embedder: BatchedEmbedder,
        graph: Arc<GraphIngestionService>,
        ingestion: Arc<IngestionService>,
        locks: RepoLocks,
        chunk: ChunkConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            embedder,
            graph,
            ingestion,
            locks,
            chunk,
        }
    }

    /// Full re-index path: delegates to the ingestion service with force.
    pub async fn force_update(&self, name: &str) -> Result<IndexOutcome> {
        let url = {
            let catalog = self.catalog.lock();
            catalog
                .get(name)
                .map(|r| r.url.clone())
                .ok_or_else(|| IndexError::RepositoryNotFound(name.to_string()))?
        };
        self.ingestion
            .index_repository(
                &url,
                IndexOptions {
                    name: Some(name.to_string()),
                    force: true,
                    ..Default::default()
                },
            )
            .await
    }

    /// Apply the upstream delta since the last indexed commit.
    pub async fn update_repository(&self, name: &str) -> Result<UpdateOutcome> {
        let start = Instant::now();
        let _guard = self.locks.try_lock(name)?;

        let (workdir, branch, base) = {
            let catalog = self.catalog.lock();
            let record = catalog
                .get(name)
                .ok_or_else(|| IndexError::RepositoryNotFound(name.to_string()))?;
            let base = record.last_indexed_commit.clone().ok_or_else(|| {
                IndexError::Catalog(format!(
                    "repository '{name}' has never been indexed; run index first"
                ))
            })?;
            (record.local_path.clone(), record.branch.clone(), base)
        };

        git::fetch(&workdir).await?;
        let head = git::remote_head(&workdir, &branch).await?;
        let commit_message = git::commit_message(&workdir, &head).await.unwrap_or_default();

        if head == base {
            debug!("'{name}' is up to date at {head}");
            return Ok(UpdateOutcome {
                status: UpdateStatus::NoChanges,
                repository: name.to_string(),
                commit_sha: head,
                commit_message,
                stats: UpdateStats::default(),
                errors: Vec::new(),
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        let changes = git::diff_name_status(&workdir, &base, &head).await?;
        git::checkout(&workdir, &head).await?;
        info!(
            "updating '{name}': {} changed files ({base:.8}..{head:.8})",
            changes.total_changes()
        );

        let collection = collection_name(name);
        let dimensions = self.embedder.dimensions() as u64;
        self.store
            .get_or_create_collection(&collection, dimensions)
            .await?;

        let mut stats = UpdateStats::default();
        let mut errors: Vec<FileError> = Vec::new();

        self.apply_changes(
            name,
            &workdir,
            &collection,
            &changes,
            &mut stats,
            &mut errors,
        )
        .await?;

        // Advance the commit cursor and counters; per-file errors do not
        // block the advance (the failed files are recorded for follow-up).
        {
            let mut catalog = self.catalog.lock();
            if let Some(record) = catalog.get_mut(name) {
                record.last_indexed_commit = Some(head.clone());
                record.status = RepoStatus::Ready;
                record.file_count =
                    (record.file_count + stats.files_added).saturating_sub(stats.files_deleted);
                record.chunk_count = (record.chunk_count + stats.chunks_upserted)
                    .saturating_sub(stats.chunks_deleted);
                record.touch();
            }
            catalog.save()?;
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(UpdateOutcome {
            status: if errors.is_empty() {
                UpdateStatus::Updated
            } else {
                UpdateStatus::UpdatedWithErrors
            },
            repository: name.to_string(),
            commit_sha: head,
            commit_message,
            duration_ms: stats.duration_ms,
            stats,
            errors,
        })
    }

    /// Reingest one path from the working tree (the folder watcher's entry
    /// point). Deleted paths are removed from both stores; anything else is
    /// run through the per-file mutation protocol.
    pub async fn reingest_path(&self, name: &str, path: &str) -> Result<usize> {
        let _guard = self.locks.try_lock(name)?;
        let workdir = {
            let catalog = self.catalog.lock();
            catalog
                .get(name)
                .map(|r| r.local_path.clone())
                .ok_or_else(|| IndexError::RepositoryNotFound(name.to_string()))?
        };
        let collection = collection_name(name);
        self.store
            .get_or_create_collection(&collection, self.embedder.dimensions() as u64)
            .await?;

        if workdir.join(path).is_file() {
            self.upsert_file(name, &workdir, &collection, path).await
        } else {
            self.delete_file(name, &collection, path).await
        }
    }

    /// File mutations are sequential to keep both stores in lockstep.
    async fn apply_changes(
        &self,
        name: &str,
        workdir: &Path,
        collection: &str,
        changes: &ChangeSet,
        stats: &mut UpdateStats,
        errors: &mut Vec<FileError>,
    ) -> Result<()> {
        // Deletions first, including rename sources.
        for path in &changes.deleted {
            match self.delete_file(name, collection, path).await {
                Ok(deleted) => {
                    stats.files_deleted += 1;
                    stats.chunks_deleted += deleted;
                }
                Err(e) => errors.push(FileError {
                    path: path.clone(),
                    error: e.to_string(),
                }),
            }
        }

        for (old, new) in &changes.renamed {
            match old {
                Some(old_path) => {
                    match self.delete_file(name, collection, old_path).await {
                        Ok(deleted) => stats.chunks_deleted += deleted,
                        Err(e) => errors.push(FileError {
                            path: old_path.clone(),
                            error: e.to_string(),
                        }),
                    }
                    match self.upsert_file(name, workdir, collection, new).await {
                        Ok(upserted) => {
                            stats.files_added += 1;
                            stats.chunks_upserted += upserted;
                        }
                        Err(e) => errors.push(FileError {
                            path: new.clone(),
                            error: e.to_string(),
                        }),
                    }
                }
                None => {
                    // A rename with no source path cannot be applied safely.
                    errors.push(FileError {
                        path: new.clone(),
                        error: "rename without old path; re-index with --force".into(),
                    });
                }
            }
        }

        for path in &changes.added {
            match self.upsert_file(name, workdir, collection, path).await {
                Ok(upserted) => {
                    stats.files_added += 1;
                    stats.chunks_upserted += upserted;
                }
                Err(e) => errors.push(FileError {
                    path: path.clone(),
                    error: e.to_string(),
                }),
            }
        }

        for path in &changes.modified {
            match self.upsert_file(name, workdir, collection, path).await {
                Ok(upserted) => {
                    stats.files_modified += 1;
                    stats.chunks_upserted += upserted;
                }
                Err(e) => errors.push(FileError {
                    path: path.clone(),
                    error: e.to_string(),
                }),
            }
        }

        Ok(())
    }

    /// Remove one file from both stores; returns deleted chunk count.
    async fn delete_file(&self, name: &str, collection: &str, path: &str) -> Result<usize> {
        let existing = self.store.count_by_file(collection, name, path).await?;
        self.store
            .delete_by_file_prefix(collection, name, path)
            .await?;
        self.graph.client().delete_file_scope(name, path).await?;
        debug!("deleted {name}:{path} ({existing} chunks)");
        Ok(existing as usize)
    }

    /// Re-chunk, re-embed and re-ingest one file; returns upserted chunk
    /// count. Unchanged content (same hash, vectors present) is a no-op.
    async fn upsert_file(
        &self,
        name: &str,
        workdir: &Path,
        collection: &str,
        path: &str,
    ) -> Result<usize> {
        let abs = workdir.join(path);
        let content = tokio::fs::read_to_string(&abs).await?;
        let hash = sha256_hex(content.as_bytes());

        let stored_hash = self.graph.client().file_hash(name, path).await?;
        if stored_hash.as_deref() == Some(hash.as_str()) {
            let vector_docs = self.store.count_by_file(collection, name, path).await?;
            if vector_docs > 0 {
                debug!("skipping {name}:{path}: content hash unchanged");
                return Ok(0);
            }
            // Graph-only state left by an interrupted run: rebuild vectors.
            info!("recovering missing vector documents for {name}:{path}");
        }

        let chunks = chunk_text(&content, &self.chunk)?;

        // (a) delete old vector docs
        self.store
            .delete_by_file_prefix(collection, name, path)
            .await?;

        // (b)+(c) replace graph file scope
        self.graph
            .reingest_file(
                name,
                FileInput {
                    path: path.to_string(),
                    content: content.clone(),
                    hash: Some(hash.clone()),
                    chunks: chunks.clone(),
                },
            )
            .await?;

        // (d) insert new vector docs
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(texts).await?;

        let metadata = tokio::fs::metadata(&abs).await.ok();
        let indexed_at = Utc::now().to_rfc3339();
        let file_modified_at = metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(|t| chrono::DateTime::<Utc>::from(t).to_rfc3339());
        let size_bytes = metadata.map(|m| m.len()).unwrap_or(content.len() as u64);
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let docs: Vec<ChunkDocument> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkDocument {
                id: doc_id(name, path, chunk.index),
                vector,
                content: chunk.content.clone(),
                metadata: ChunkMetadata {
                    file_path: path.to_string(),
                    repository: name.to_string(),
                    chunk_index: chunk.index,
                    total_chunks: chunk.total,
                    file_extension: extension.clone(),
                    file_size_bytes: size_bytes,
                    chunk_start_line: chunk.start_line,
                    chunk_end_line: chunk.end_line,
                    content_hash: chunk.content_hash.clone(),
                    indexed_at: indexed_at.clone(),
                    file_modified_at: file_modified_at.clone(),
                },
            })
            .collect();

        let upserted = self.store.upsert(collection, docs).await?;
        Ok(upserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(UpdateStatus::NoChanges).unwrap(),
            serde_json::json!("no_changes")
        );
        assert_eq!(
            serde_json::to_value(UpdateStatus::UpdatedWithErrors).unwrap(),
            serde_json::json!("updated_with_errors")
        );
    }

    #[test]
    fn outcome_shape_matches_contract() {
        let outcome = UpdateOutcome {
            status: UpdateStatus::Updated,
            repository: "r1".into(),
            commit_sha: "abc".into(),
            commit_message: "msg".into(),
            stats: UpdateStats {
                files_added: 1,
                files_modified: 1,
                files_deleted: 1,
                chunks_upserted: 2,
                chunks_deleted: 1,
                duration_ms: 5,
            },
            errors: vec![],
            duration_ms: 5,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "updated");
        assert_eq!(json["stats"]["files_added"], 1);
        assert_eq!(json["stats"]["chunks_upserted"], 2);
        assert!(json["errors"].as_array().unwrap().is_empty());
    }
}
