//! Repository ingestion service.
//!
//! Orchestrates clone → scan → chunk → embed → store ∥ graph-ingest for one
//! repository. Chunking runs in a bounded worker pool; the vector upsert and
//! the graph ingest run concurrently once per-file chunks and content are
//! ready. The repository flips to `ready` only when both sides complete
//! without fatal error, and `last_indexed_commit` advances only then (I4).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use codescope_core::{
    chunk_text, sha256_hex, Chunk, ChunkConfig, RepoStatus, ScanConfig, ScannedFile, Scanner,
};
use codescope_graph::{FileInput, GraphIngestionService, IngestOptions};
use codescope_search::schema::{collection_name, doc_id};
use codescope_search::{BatchedEmbedder, ChunkDocument, ChunkMetadata, VectorStore};

use crate::catalog::{RepositoryCatalog, RepositoryRecord};
use crate::error::{IndexError, Result};
use crate::git;
use crate::locks::RepoLocks;

/// Default bounded chunking pool width.
const DEFAULT_WORKERS: usize = 8;

/// Pipeline stage reported to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexPhase {
    Cloning,
    Scanning,
    Chunking,
    Embedding,
    Storing,
    GraphIngesting,
    Finalizing,
}

impl IndexPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexPhase::Cloning => "cloning",
            IndexPhase::Scanning => "scanning",
            IndexPhase::Chunking => "chunking",
            IndexPhase::Embedding => "embedding",
            IndexPhase::Storing => "storing",
            IndexPhase::GraphIngesting => "graph-ingesting",
            IndexPhase::Finalizing => "finalizing",
        }
    }
}

/// Progress callback: `(phase, details)`.
pub type ProgressFn = Arc<dyn Fn(IndexPhase, &str) + Send + Sync>;

/// Options for [`IngestionService::index_repository`].
#[derive(Clone, Default)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub branch: Option<String>,
    pub force: bool,
    pub on_progress: Option<ProgressFn>,
}

/// Overall operation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Success,
    Partial,
    Failed,
}

/// Per-file error in an outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

/// Ingestion statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub documents_stored: usize,
    pub duration_ms: u64,
}

/// Result of one index run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub status: OpStatus,
    pub repository: String,
    pub collection_name: String,
    pub commit_sha: String,
    pub stats: IndexStats,
    pub errors: Vec<FileError>,
    pub completed_at: String,
}

/// One file's prepared work product.
struct FileWork {
    scanned: ScannedFile,
    content: String,
    hash: String,
    chunks: Vec<Chunk>,
}

/// Configuration for the ingestion service.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Root for `repos/{name}` working trees and `metadata.json`.
    pub data_path: PathBuf,
    pub scan: ScanConfig,
    pub chunk: ChunkConfig,
    pub workers: usize,
}

impl IngestionConfig {
    pub fn new(data_path: PathBuf) -> Self {
        Self {
            data_path,
            scan: ScanConfig::default(),
            chunk: ChunkConfig::default(),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// The ingestion pipeline (C8). Owns repository lifecycle state transitions.
pub struct IngestionService {
    config: IngestionConfig,
    catalog: Arc<Mutex<RepositoryCatalog>>,
    store: Arc<VectorStore>,
    embedder: BatchedEmbedder,
    graph: Arc<GraphIngestionService>,
    locks: RepoLocks,
}

impl IngestionService {
    pub fn new(
        config: IngestionConfig,
        catalog: Arc<Mutex<RepositoryCatalog>>,
        store: Arc<VectorStore>,
        embedder: BatchedEmbedder,
        graph: Arc<GraphIngestionService>,
        locks: RepoLocks,
    ) -> Self {
        Self {
            config,
            catalog,
            store,
            embedder,
            graph,
            locks,
        }
    }

    pub fn locks(&self) -> &RepoLocks {
        &self.locks
    }

    pub fn catalog(&self) -> &Arc<Mutex<RepositoryCatalog>> {
        &self.catalog
    }

    /// Index a repository from its URL.
    pub async fn index_repository(
        &self,
        url: &str,
        options: IndexOptions,
    ) -> Result<IndexOutcome> {
        let start = Instant::now();
        let name = match &options.name {
            Some(n) => n.clone(),
            None => git::repo_name_from_url(url)?,
        };
        let _guard = self.locks.try_lock(&name)?;

        // An already-indexed repository needs force to be replaced.
        let previously_indexed = {
            let catalog = self.catalog.lock();
            catalog
                .get(&name)
                .map(|r| r.last_indexed_commit.is_some())
                .unwrap_or(false)
        };
        if previously_indexed && !options.force {
            return Err(IndexError::RepositoryExists(name));
        }

        let workdir = self.config.data_path.join("repos").join(&name);
        let progress = options.on_progress.clone();
        let report = |phase: IndexPhase, details: &str| {
            if let Some(cb) = &progress {
                cb(phase, details);
            }
        };

        // Cloning (serialized per repository by the lock we hold).
        report(IndexPhase::Cloning, url);
        git::clone_or_fetch(url, &workdir, options.branch.as_deref()).await?;
        let branch = match &options.branch {
            Some(b) => {
                git::checkout(&workdir, &format!("origin/{b}")).await?;
                b.clone()
            }
            None => git::current_branch(&workdir).await?,
        };
        let head = git::rev_parse(&workdir, "HEAD").await?;

        // Catalog: create or reset the record, mark indexing.
        {
            let mut catalog = self.catalog.lock();
            let mut record = catalog
                .get(&name)
                .cloned()
                .unwrap_or_else(|| RepositoryRecord::new(&name, url, &branch, workdir.clone()));
            record.status = RepoStatus::Indexing;
            record.branch = branch.clone();
            record.touch();
            catalog.upsert(record);
            catalog.save()?;
        }

        let result = self
            .run_pipeline(&name, url, &workdir, &head, &options, &report)
            .await;

        // Finalize catalog state; the commit SHA advances only on success.
        let mut catalog = self.catalog.lock();
        match &result {
            Ok(outcome) => {
                if let Some(record) = catalog.get_mut(&name) {
                    record.status = RepoStatus::Ready;
                    record.last_indexed_commit = Some(head.clone());
                    record.file_count = outcome.stats.files_processed;
                    record.chunk_count = outcome.stats.chunks_created;
                    record.touch();
                }
            }
            Err(_) => {
                if let Some(record) = catalog.get_mut(&name) {
                    record.status = RepoStatus::Error;
                    record.touch();
                }
            }
        }
        catalog.save()?;
        drop(catalog);

        result.map(|mut outcome| {
            outcome.stats.duration_ms = start.elapsed().as_millis() as u64;
            outcome
        })
    }

    async fn run_pipeline(
        &self,
        name: &str,
        url: &str,
        workdir: &std::path::Path,
        head: &str,
        options: &IndexOptions,
        report: &(dyn Fn(IndexPhase, &str) + Send + Sync),
    ) -> Result<IndexOutcome> {
        let collection = collection_name(name);

        if options.force {
            info!("force index: purging vector collection '{collection}'");
            self.store.delete_collection(&collection).await?;
        }

        // Scanning.
        report(IndexPhase::Scanning, workdir.to_string_lossy().as_ref());
        let scanner = Scanner::new(self.scan_config_for(name))?;
        let files = {
            let workdir = workdir.to_path_buf();
            let scanned = tokio::task::spawn_blocking(move || scanner.scan(&workdir, None))
                .await
                .map_err(|e| IndexError::Catalog(format!("scan task panicked: {e}")))??;
            scanned
        };
        let files_scanned = files.len();
        report(IndexPhase::Scanning, &format!("{files_scanned} files"));

        // Chunking in a bounded pool.
        report(IndexPhase::Chunking, &format!("{files_scanned} files"));
        let chunk_config = self.config.chunk.clone();
        let mut errors: Vec<FileError> = Vec::new();
        let results: Vec<std::result::Result<FileWork, FileError>> = stream::iter(files)
            .map(|scanned| {
                let chunk_config = chunk_config.clone();
                async move { prepare_file(scanned, chunk_config).await }
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut work: Vec<FileWork> = Vec::new();
        for r in results {
            match r {
                Ok(w) => work.push(w),
                Err(e) => errors.push(e),
            }
        }
        // Deterministic downstream order regardless of pool completion order.
        work.sort_by(|a, b| a.scanned.relative_path.cmp(&b.scanned.relative_path));

        let chunks_created: usize = work.iter().map(|w| w.chunks.len()).sum();

        // Embedding.
        report(IndexPhase::Embedding, &format!("{chunks_created} chunks"));
        let texts: Vec<String> = work
            .iter()
            .flat_map(|w| w.chunks.iter().map(|c| c.content.clone()))
            .collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(texts).await?
        };
        let embeddings_generated = vectors.len();

        // Documents, aligned with the flattened chunk order.
        let indexed_at = Utc::now().to_rfc3339();
        let mut docs: Vec<ChunkDocument> = Vec::with_capacity(embeddings_generated);
        let mut vector_iter = vectors.into_iter();
        for w in &work {
            for chunk in &w.chunks {
                let Some(vector) = vector_iter.next() else {
                    break;
                };
                docs.push(make_document(name, w, chunk, vector, &indexed_at));
            }
        }

        // Vector upsert and graph ingest run concurrently.
        report(IndexPhase::Storing, &format!("{} documents", docs.len()));
        report(IndexPhase::GraphIngesting, &format!("{} files", work.len()));
        let file_inputs: Vec<FileInput> = work
            .iter()
            .map(|w| FileInput {
                path: w.scanned.relative_path.clone(),
                content: w.content.clone(),
                hash: Some(w.hash.clone()),
                chunks: w.chunks.clone(),
            })
            .collect();

        let dimensions = self.embedder.dimensions() as u64;
        let store_fut = async {
            self.store
                .get_or_create_collection(&collection, dimensions)
                .await?;
            self.store.upsert(&collection, docs).await
        };
        let graph_fut = self.graph.ingest(
            file_inputs,
            IngestOptions {
                repository: name.to_string(),
                repository_url: url.to_string(),
                force: options.force,
            },
        );
        let (store_result, graph_result) = tokio::join!(store_fut, graph_fut);

        let documents_stored = store_result?;
        let graph_outcome = graph_result?;
        for fe in graph_outcome.errors {
            errors.push(FileError {
                path: fe.path,
                error: fe.error,
            });
        }

        report(IndexPhase::Finalizing, name);
        let files_processed = work.len();
        let files_failed = errors.len();
        if files_failed > 0 {
            warn!("indexed '{name}' with {files_failed} file errors");
        }

        Ok(IndexOutcome {
            status: if errors.is_empty() {
                OpStatus::Success
            } else {
                OpStatus::Partial
            },
            repository: name.to_string(),
            collection_name: collection,
            commit_sha: head.to_string(),
            stats: IndexStats {
                files_scanned,
                files_processed,
                files_failed,
                chunks_created,
                embeddings_generated,
                documents_stored,
                duration_ms: 0,
            },
            errors,
            completed_at: Utc::now().to_rfc3339(),
        })
    }

    /// Remove a repository from catalog, vector store and graph.
    pub async fn remove_repository(&self, name: &str) -> Result<()> {
        let _guard = self.locks.try_lock(name)?;

        let record = {
            let mut catalog = self.catalog.lock();
            let record = catalog
                .remove(name)
                .ok_or_else(|| IndexError::RepositoryNotFound(name.to_string()))?;
            catalog.save()?;
            record
        };

        self.store.delete_collection(&collection_name(name)).await?;
        // The graph client lives behind the ingestion service.
        self.graph.client().delete_repository_scope(name).await?;

        if record.local_path.is_dir() {
            std::fs::remove_dir_all(&record.local_path)?;
        }
        info!("removed repository '{name}'");
        Ok(())
    }

    fn scan_config_for(&self, name: &str) -> ScanConfig {
        let catalog = self.catalog.lock();
        let mut scan = self.config.scan.clone();
        if let Some(record) = catalog.get(name) {
            if let Some(ref include) = record.include_extensions {
                scan.include_extensions = include.clone();
            }
            if let Some(ref exclude) = record.exclude_patterns {
                scan.exclude_patterns.extend(exclude.iter().cloned());
            }
        }
        scan
    }
}

/// Read and chunk one file off the async executor.
async fn prepare_file(
    scanned: ScannedFile,
    chunk_config: ChunkConfig,
) -> std::result::Result<FileWork, FileError> {
    let content = match tokio::fs::read_to_string(&scanned.absolute_path).await {
        Ok(c) => c,
        Err(e) => {
            return Err(FileError {
                path: scanned.relative_path.clone(),
                error: format!("read failed: {e}"),
            })
        }
    };
    let hash = sha256_hex(content.as_bytes());
    let chunks = chunk_text(&content, &chunk_config).map_err(|e| FileError {
        path: scanned.relative_path.clone(),
        error: format!("chunking failed: {e}"),
    })?;
    Ok(FileWork {
        scanned,
        content,
        hash,
        chunks,
    })
}

fn make_document(
    repo: &str,
    work: &FileWork,
    chunk: &Chunk,
    vector: Vec<f32>,
    indexed_at: &str,
) -> ChunkDocument {
    let file_modified_at = work
        .scanned
        .modified_at
        .map(|t: SystemTime| DateTime::<Utc>::from(t).to_rfc3339());
    ChunkDocument {
        id: doc_id(repo, &work.scanned.relative_path, chunk.index),
        vector,
        content: chunk.content.clone(),
        metadata: ChunkMetadata {
            file_path: work.scanned.relative_path.clone(),
            repository: repo.to_string(),
            chunk_index: chunk.index,
            total_chunks: chunk.total,
            file_extension: work.scanned.extension.clone(),
            file_size_bytes: work.scanned.size_bytes,
            chunk_start_line: chunk.start_line,
            chunk_end_line: chunk.end_line,
            content_hash: chunk.content_hash.clone(),
            indexed_at: indexed_at.to_string(),
            file_modified_at,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names_are_kebab_case() {
        assert_eq!(IndexPhase::GraphIngesting.as_str(), "graph-ingesting");
        assert_eq!(IndexPhase::Cloning.as_str(), "cloning");
    }

    #[test]
    fn document_ids_follow_repo_path_index() {
        let scanned = ScannedFile {
            relative_path: "src/a.ts".into(),
            absolute_path: PathBuf::from("/tmp/src/a.ts"),
            extension: "ts".into(),
            size_bytes: 10,
            modified_at: None,
        };
        let work = FileWork {
            scanned,
            content: "let x;".into(),
            hash: "h".into(),
            chunks: Vec::new(),
        };
        let chunk = Chunk {
            index: 2,
            total: 3,
            content: "let x;".into(),
            start_line: 1,
            end_line: 1,
            content_hash: "ch".into(),
        };
        let doc = make_document("r1", &work, &chunk, vec![0.0; 3], "2024-01-01T00:00:00Z");
        assert_eq!(doc.id, "r1:src/a.ts:2");
        assert_eq!(doc.metadata.total_chunks, 3);
        assert_eq!(doc.metadata.repository, "r1");
    }
}
