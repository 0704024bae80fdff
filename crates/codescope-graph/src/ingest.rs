//! Graph ingestion service.
//!
//! Batched, transactional node+edge upsert for one repository. Writes happen
//! in short transactions (one batch each) so no graph lock is held across
//! network calls. Per-file state is *replacing*: a file's previous entities,
//! chunks and edges are deleted before its new ones are inserted.
//!
//! Call/extends/implements targets are resolved after all files are
//! extracted, against in-repo name tables; unresolved calls are dropped and
//! unresolved heritage points at the repository's sentinel unknown module.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use codescope_core::chunker::Chunk;
use codescope_core::extract::{extract_fragment, chunk_nodes, FileFragment};
use codescope_core::model::{
    EdgeProps, EdgeType, GraphEdge, GraphNode, RepoStatus,
};
use codescope_core::parser::{HeritageRelation, ParserRouter};
use codescope_core::sha256_hex;

use crate::client::{merge_edge_query, merge_node_query, GraphClient};
use crate::error::{BatchContext, GraphError, Result};

/// Node batch size (files, entities, modules, chunks).
const NODE_BATCH_SIZE: usize = 50;

/// Edge batch size.
const EDGE_BATCH_SIZE: usize = 100;

/// Transient batch retry budget.
const BATCH_RETRIES: u32 = 2;

/// Resolution policy recorded in every result.
const RESOLUTION_POLICY: &str =
    "same-repo name tables; ambiguity resolved to lexicographically smallest id; \
     unresolved calls dropped; unresolved heritage linked to sentinel unknown module";

/// One file handed to the ingestion service.
#[derive(Debug, Clone)]
pub struct FileInput {
    /// Repository-relative POSIX path.
    pub path: String,
    pub content: String,
    /// SHA-256 of the raw bytes; computed when absent.
    pub hash: Option<String>,
    /// Chunk set for HAS_CHUNK edges; empty when the caller only wants the
    /// code graph.
    pub chunks: Vec<Chunk>,
}

/// Repository-scoped ingestion options.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub repository: String,
    pub repository_url: String,
    pub force: bool,
}

/// Per-file failure recorded in the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

/// Ingestion statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub entities_created: usize,
    pub modules_created: usize,
    pub chunks_created: usize,
    pub relationships_created: usize,
    pub calls_resolved: usize,
    pub calls_dropped: usize,
    pub duration_ms: u64,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub repository: String,
    pub stats: IngestStats,
    pub errors: Vec<FileError>,
    pub resolution_policy: String,
}

/// Keyed per-repository lock map. Acquisition is fail-fast: a held key means
/// another ingestion is active (I3). The guard releases on every exit path.
#[derive(Default, Clone)]
pub struct RepoLockMap {
    held: Arc<DashMap<String, ()>>,
}

impl RepoLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self, repo: &str) -> Result<RepoLockGuard> {
        use dashmap::mapref::entry::Entry;
        match self.held.entry(repo.to_string()) {
            Entry::Occupied(_) => Err(GraphError::IngestionInProgress(repo.to_string())),
            Entry::Vacant(v) => {
                v.insert(());
                Ok(RepoLockGuard {
                    held: Arc::clone(&self.held),
                    repo: repo.to_string(),
                })
            }
        }
    }

    pub fn is_locked(&self, repo: &str) -> bool {
        self.held.contains_key(repo)
    }
}

/// RAII guard for a repository lock.
pub struct RepoLockGuard {
    held: Arc<DashMap<String, ()>>,
    repo: String,
}

impl Drop for RepoLockGuard {
    fn drop(&mut self) {
        self.held.remove(&self.repo);
    }
}

/// Batched, transactional graph ingestion for one repository at a time.
pub struct GraphIngestionService {
    client: Arc<GraphClient>,
    router: ParserRouter,
    locks: RepoLockMap,
}

impl GraphIngestionService {
    pub fn new(client: Arc<GraphClient>) -> Self {
        Self {
            client,
            router: ParserRouter::default(),
            locks: RepoLockMap::new(),
        }
    }

    pub fn with_router(mut self, router: ParserRouter) -> Self {
        self.router = router;
        self
    }

    pub fn locks(&self) -> &RepoLockMap {
        &self.locks
    }

    pub fn client(&self) -> &Arc<GraphClient> {
        &self.client
    }

    /// Ingest a repository's files into the graph.
    pub async fn ingest(
        &self,
        files: Vec<FileInput>,
        options: IngestOptions,
    ) -> Result<IngestOutcome> {
        let start = Instant::now();
        let repo = options.repository.clone();
        let _guard = self.locks.try_lock(&repo)?;

        let repo_node_id = format!("Repository:{repo}");
        let existing = self.client.find_node(&repo_node_id).await?;
        if existing.is_some() {
            if !options.force {
                return Err(GraphError::RepositoryExists(repo));
            }
            info!("force ingest: purging existing graph state for '{repo}'");
            self.client.delete_repository_scope(&repo).await?;
        }

        self.client
            .upsert_node(&GraphNode::Repository {
                name: repo.clone(),
                url: options.repository_url.clone(),
                status: RepoStatus::Indexing,
                last_indexed: None,
            })
            .await?;

        // Parse + extract every file up front; per-file failures are
        // non-fatal and recorded.
        let mut fragments: Vec<(FileFragment, Vec<Chunk>)> = Vec::new();
        let mut errors: Vec<FileError> = Vec::new();
        for file in &files {
            let parse = self.router.parse_content(&file.path, &file.content);
            if !parse.success {
                errors.push(FileError {
                    path: file.path.clone(),
                    error: parse
                        .errors
                        .first()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "parse failed".into()),
                });
                continue;
            }
            let hash = file
                .hash
                .clone()
                .unwrap_or_else(|| sha256_hex(file.content.as_bytes()));
            fragments.push((extract_fragment(&repo, &parse, &hash), file.chunks.clone()));
        }

        // Per-file replacement before any insertion (I5).
        let delete_queries: Vec<neo4rs::Query> = fragments
            .iter()
            .map(|(frag, _)| file_scope_delete_query(&repo, frag))
            .collect();
        for batch in delete_queries.chunks(NODE_BATCH_SIZE) {
            self.run_batch_with_retry(batch.to_vec(), BatchContext::default())
                .await?;
        }

        let mut stats = IngestStats {
            files_processed: fragments.len(),
            files_failed: errors.len(),
            ..Default::default()
        };

        // File nodes.
        let file_nodes: Vec<neo4rs::Query> = fragments
            .iter()
            .map(|(frag, _)| merge_node_query(&frag.file_node))
            .collect();
        self.run_node_batches(file_nodes, "file nodes").await?;

        // Entity nodes.
        let mut entity_queries = Vec::new();
        for (frag, _) in &fragments {
            for entity in &frag.entities {
                entity_queries.push(merge_node_query(entity));
                stats.entities_created += 1;
            }
        }
        self.run_node_batches(entity_queries, "entity nodes").await?;

        // Module nodes, deduplicated across files.
        let mut modules: BTreeMap<String, &GraphNode> = BTreeMap::new();
        for (frag, _) in &fragments {
            for module in &frag.modules {
                modules.entry(module.id()).or_insert(module);
            }
        }
        stats.modules_created = modules.len();
        let module_queries: Vec<neo4rs::Query> =
            modules.values().map(|m| merge_node_query(m)).collect();
        self.run_node_batches(module_queries, "module nodes").await?;

        // Chunk nodes.
        let mut chunk_queries = Vec::new();
        let mut chunk_edge_queries = Vec::new();
        for (frag, chunks) in &fragments {
            if chunks.is_empty() {
                continue;
            }
            let path = match &frag.file_node {
                GraphNode::File { path, .. } => path.clone(),
                _ => continue,
            };
            let (nodes, edges) = chunk_nodes(&repo, &path, chunks);
            stats.chunks_created += nodes.len();
            chunk_queries.extend(nodes.iter().map(merge_node_query));
            chunk_edge_queries.extend(edges.iter().map(merge_edge_query));
        }
        self.run_node_batches(chunk_queries, "chunk nodes").await?;

        // CONTAINS + DEFINES + IMPORTS + HAS_CHUNK edges.
        let mut edge_queries = Vec::new();
        for (frag, _) in &fragments {
            let contains = GraphEdge::new(&repo_node_id, frag.file_node.id(), EdgeType::Contains);
            edge_queries.push(merge_edge_query(&contains));
            stats.relationships_created += 1;
            for edge in &frag.edges {
                edge_queries.push(merge_edge_query(edge));
                stats.relationships_created += 1;
            }
        }
        stats.relationships_created += chunk_edge_queries.len();
        edge_queries.extend(chunk_edge_queries);
        self.run_edge_batches(edge_queries, "structural edges").await?;

        // Resolution pass.
        let resolved = resolve_pending(&repo, &fragments);
        stats.calls_resolved = resolved.calls_resolved;
        stats.calls_dropped = resolved.calls_dropped;
        stats.relationships_created += resolved.edges.len();
        if resolved.needs_sentinel {
            self.client
                .upsert_node(&GraphNode::unknown_module(&repo))
                .await?;
        }
        let resolved_queries: Vec<neo4rs::Query> =
            resolved.edges.iter().map(merge_edge_query).collect();
        self.run_edge_batches(resolved_queries, "resolved edges").await?;

        // Verify counts before declaring success.
        let stored_files = self
            .client
            .count_label(&repo, codescope_core::model::NodeLabel::File)
            .await?;
        if (stored_files as usize) < fragments.len() {
            warn!(
                "file count mismatch after ingest: stored {stored_files}, expected {}",
                fragments.len()
            );
        }

        self.client
            .upsert_node(&GraphNode::Repository {
                name: repo.clone(),
                url: options.repository_url,
                status: RepoStatus::Ready,
                last_indexed: Some(chrono::Utc::now().to_rfc3339()),
            })
            .await?;

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "graph ingest for '{repo}' complete: {} files, {} entities, {} relationships",
            stats.files_processed, stats.entities_created, stats.relationships_created
        );

        Ok(IngestOutcome {
            repository: repo,
            stats,
            errors,
            resolution_policy: RESOLUTION_POLICY.to_string(),
        })
    }

    /// Replace a single file's graph scope (used by the incremental path).
    pub async fn reingest_file(&self, repo: &str, file: FileInput) -> Result<IngestStats> {
        let start = Instant::now();
        self.client.delete_file_scope(repo, &file.path).await?;

        let parse = self.router.parse_content(&file.path, &file.content);
        let hash = file
            .hash
            .clone()
            .unwrap_or_else(|| sha256_hex(file.content.as_bytes()));
        let frag = extract_fragment(repo, &parse, &hash);

        let mut queries = vec![merge_node_query(&frag.file_node)];
        let mut stats = IngestStats {
            files_processed: 1,
            ..Default::default()
        };
        for entity in &frag.entities {
            queries.push(merge_node_query(entity));
            stats.entities_created += 1;
        }
        for module in &frag.modules {
            queries.push(merge_node_query(module));
            stats.modules_created += 1;
        }
        let repo_node_id = format!("Repository:{repo}");
        queries.push(merge_edge_query(&GraphEdge::new(
            &repo_node_id,
            frag.file_node.id(),
            EdgeType::Contains,
        )));
        for edge in &frag.edges {
            queries.push(merge_edge_query(edge));
            stats.relationships_created += 1;
        }
        let (chunk_ns, chunk_es) = chunk_nodes(repo, &file.path, &file.chunks);
        stats.chunks_created = chunk_ns.len();
        queries.extend(chunk_ns.iter().map(merge_node_query));
        queries.extend(chunk_es.iter().map(merge_edge_query));

        // Single-file resolution only sees its own entities; cross-file
        // calls resolve on the next full ingest.
        let fragments = vec![(frag, file.chunks.clone())];
        let resolved = resolve_pending(repo, &fragments);
        stats.calls_resolved = resolved.calls_resolved;
        stats.calls_dropped = resolved.calls_dropped;
        if resolved.needs_sentinel {
            queries.push(merge_node_query(&GraphNode::unknown_module(repo)));
        }
        queries.extend(resolved.edges.iter().map(merge_edge_query));

        let context = BatchContext {
            file_path: Some(file.path.clone()),
            ..Default::default()
        };
        for batch in queries.chunks(EDGE_BATCH_SIZE) {
            self.run_batch_with_retry(
                batch.iter().map(clone_query).collect(),
                context.clone(),
            )
            .await?;
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn run_node_batches(&self, queries: Vec<neo4rs::Query>, what: &str) -> Result<()> {
        for batch in queries.chunks(NODE_BATCH_SIZE) {
            debug!("writing {} {what}", batch.len());
            self.run_batch_with_retry(
                batch.iter().map(clone_query).collect(),
                BatchContext::default(),
            )
            .await?;
        }
        Ok(())
    }

    async fn run_edge_batches(&self, queries: Vec<neo4rs::Query>, what: &str) -> Result<()> {
        for batch in queries.chunks(EDGE_BATCH_SIZE) {
            debug!("writing {} {what}", batch.len());
            self.run_batch_with_retry(
                batch.iter().map(clone_query).collect(),
                BatchContext::default(),
            )
            .await?;
        }
        Ok(())
    }

    async fn run_batch_with_retry(
        &self,
        queries: Vec<neo4rs::Query>,
        context: BatchContext,
    ) -> Result<()> {
        let mut delay = Duration::from_millis(200);
        for attempt in 0..=BATCH_RETRIES {
            let cloned: Vec<neo4rs::Query> = queries.iter().map(clone_query).collect();
            match self.client.run_batch(cloned).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < BATCH_RETRIES => {
                    warn!("batch write failed transiently (attempt {}): {e}", attempt + 1);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    return Err(GraphError::BatchFailed {
                        context,
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }
        unreachable!("retry loop always returns");
    }
}

fn clone_query(q: &neo4rs::Query) -> neo4rs::Query {
    q.clone()
}

/// Delete query for one file's graph scope.
fn file_scope_delete_query(repo: &str, frag: &FileFragment) -> neo4rs::Query {
    let path = match &frag.file_node {
        GraphNode::File { path, .. } => path.clone(),
        other => other.id(),
    };
    let file_id = format!("File:{repo}:{path}");
    neo4rs::query(
        "MATCH (f:File {id: $fid}) \
         OPTIONAL MATCH (f)-[:DEFINES]->(e) \
         OPTIONAL MATCH (f)-[:HAS_CHUNK]->(c:Chunk) \
         DETACH DELETE e, c, f",
    )
    .param("fid", file_id)
}

/// Output of the resolution pass.
struct Resolved {
    edges: Vec<GraphEdge>,
    calls_resolved: usize,
    calls_dropped: usize,
    needs_sentinel: bool,
}

/// Resolve pending calls, heritage and file references against the in-repo
/// name tables.
///
/// A petgraph adjacency over entity indices deduplicates resolved call pairs
/// and keeps the (possibly cyclic) call structure explicit — the graph is
/// ids-only, never ownership.
fn resolve_pending(repo: &str, fragments: &[(FileFragment, Vec<Chunk>)]) -> Resolved {
    // Name tables: bare name → candidate node ids (sorted for determinism).
    let mut functions_by_name: HashMap<&str, Vec<String>> = HashMap::new();
    let mut classes_by_name: HashMap<&str, Vec<String>> = HashMap::new();
    let mut files_by_path: HashMap<String, String> = HashMap::new();
    let mut index_of: HashMap<String, u32> = HashMap::new();
    let mut next_index = 0u32;

    for (frag, _) in fragments {
        if let GraphNode::File { path, .. } = &frag.file_node {
            files_by_path.insert(path.clone(), frag.file_node.id());
        }
        for entity in &frag.entities {
            let id = entity.id();
            index_of.entry(id.clone()).or_insert_with(|| {
                let i = next_index;
                next_index += 1;
                i
            });
            match entity {
                GraphNode::Function { name, .. } => {
                    functions_by_name.entry(name.as_str()).or_default().push(id);
                }
                GraphNode::Class { name, .. } => {
                    classes_by_name.entry(name.as_str()).or_default().push(id);
                }
                _ => {}
            }
        }
    }
    for ids in functions_by_name.values_mut() {
        ids.sort();
    }
    for ids in classes_by_name.values_mut() {
        ids.sort();
    }

    let mut call_graph: DiGraphMap<u32, ()> = DiGraphMap::new();
    let mut edges = Vec::new();
    let mut calls_resolved = 0usize;
    let mut calls_dropped = 0usize;
    let mut needs_sentinel = false;
    let sentinel_id = GraphNode::unknown_module(repo).id();

    for (frag, _) in fragments {
        for call in &frag.pending_calls {
            let Some(targets) = functions_by_name.get(call.callee.as_str()) else {
                calls_dropped += 1;
                continue;
            };
            // Ambiguity: lexicographically smallest id wins. Self-recursion
            // is a legitimate edge.
            let target = &targets[0];
            let (Some(&from), Some(&to)) =
                (index_of.get(&call.caller_id), index_of.get(target))
            else {
                calls_dropped += 1;
                continue;
            };
            // DiGraphMap collapses duplicate pairs across fragments.
            if call_graph.add_edge(from, to, ()).is_none() {
                edges.push(
                    GraphEdge::new(&call.caller_id, target, EdgeType::Calls).with_props(
                        EdgeProps::Calls {
                            call_count: call.call_count,
                            is_async: call.is_async,
                        },
                    ),
                );
                calls_resolved += 1;
            }
        }

        for heritage in &frag.pending_heritage {
            let edge_type = match heritage.relation {
                HeritageRelation::Extends => EdgeType::Extends,
                HeritageRelation::Implements => EdgeType::Implements,
            };
            match classes_by_name.get(heritage.target.as_str()) {
                Some(targets) => {
                    edges.push(GraphEdge::new(&heritage.class_id, &targets[0], edge_type));
                }
                None => {
                    needs_sentinel = true;
                    edges.push(GraphEdge::new(&heritage.class_id, &sentinel_id, edge_type));
                }
            }
        }

        for reference in &frag.pending_references {
            // Try the exact path, then extension candidates of in-repo files.
            let target = files_by_path.get(&reference.target_path).cloned().or_else(|| {
                let prefix = format!("{}.", reference.target_path);
                let mut candidates: Vec<&String> = files_by_path
                    .iter()
                    .filter(|(p, _)| p.starts_with(&prefix))
                    .map(|(_, id)| id)
                    .collect();
                candidates.sort();
                candidates.first().map(|s| (*s).clone())
            });
            if let Some(target_id) = target {
                if target_id != reference.from_file_id {
                    edges.push(GraphEdge::new(
                        &reference.from_file_id,
                        target_id,
                        EdgeType::References,
                    ));
                }
            }
        }
    }

    Resolved {
        edges,
        calls_resolved,
        calls_dropped,
        needs_sentinel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(repo: &str, path: &str, source: &str) -> (FileFragment, Vec<Chunk>) {
        let router = ParserRouter::default();
        let parse = router.parse_content(path, source);
        (extract_fragment(repo, &parse, "h"), Vec::new())
    }

    #[test]
    fn lock_map_is_exclusive_per_repo() {
        let locks = RepoLockMap::new();
        let guard = locks.try_lock("r1").unwrap();
        assert!(matches!(
            locks.try_lock("r1"),
            Err(GraphError::IngestionInProgress(_))
        ));
        // Other repos are unaffected.
        let _other = locks.try_lock("r2").unwrap();
        drop(guard);
        assert!(locks.try_lock("r1").is_ok());
    }

    #[test]
    fn lock_releases_on_all_exit_paths() {
        let locks = RepoLockMap::new();
        {
            let _guard = locks.try_lock("r1").unwrap();
            assert!(locks.is_locked("r1"));
        }
        assert!(!locks.is_locked("r1"));
    }

    #[test]
    fn resolution_links_in_repo_calls() {
        let a = fragment(
            "r",
            "a.js",
            "function caller() { helper(); }\n",
        );
        let b = fragment("r", "b.js", "function helper() {}\n");
        let resolved = resolve_pending("r", &[a, b]);
        assert_eq!(resolved.calls_resolved, 1);
        assert_eq!(resolved.calls_dropped, 0);
        let call = resolved
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::Calls)
            .unwrap();
        assert!(call.from.contains(":caller:"));
        assert!(call.to.contains(":helper:"));
    }

    #[test]
    fn unresolved_calls_are_dropped() {
        let a = fragment("r", "a.js", "function caller() { externalFn(); }\n");
        let resolved = resolve_pending("r", &[a]);
        assert_eq!(resolved.calls_resolved, 0);
        assert_eq!(resolved.calls_dropped, 1);
    }

    #[test]
    fn ambiguous_call_targets_pick_smallest_id() {
        let a = fragment("r", "a.js", "function dup() {}\n");
        let z = fragment("r", "z.js", "function dup() {}\n");
        let caller = fragment("r", "m.js", "function m() { dup(); }\n");
        let resolved = resolve_pending("r", &[a, z, caller]);
        let call = resolved
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::Calls)
            .unwrap();
        assert!(call.to.contains(":a.js:"), "picked {}", call.to);
    }

    #[test]
    fn unresolved_heritage_uses_sentinel() {
        let a = fragment("r", "a.js", "class Child extends Missing {}\n");
        let resolved = resolve_pending("r", &[a]);
        assert!(resolved.needs_sentinel);
        let ext = resolved
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::Extends)
            .unwrap();
        assert_eq!(ext.to, "Module:unknown:r");
    }

    #[test]
    fn resolved_heritage_links_classes() {
        let a = fragment("r", "a.js", "class Base {}\nclass Child extends Base {}\n");
        let resolved = resolve_pending("r", &[a]);
        assert!(!resolved.needs_sentinel);
        let ext = resolved
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::Extends)
            .unwrap();
        assert!(ext.to.contains(":Base:"));
    }

    #[test]
    fn references_resolve_against_file_table_with_extension_guess() {
        let util = fragment("r", "src/util.ts", "export function u() {}\n");
        let main = fragment(
            "r",
            "src/main.ts",
            "import { u } from \"./util\";\n",
        );
        let resolved = resolve_pending("r", &[util, main]);
        let reference = resolved
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::References)
            .unwrap();
        assert_eq!(reference.from, "File:r:src/main.ts");
        assert_eq!(reference.to, "File:r:src/util.ts");
    }

    #[test]
    fn duplicate_call_pairs_collapse() {
        // Same caller/callee pair in two fragments produces one edge.
        let a = fragment("r", "a.js", "function f() { g(); }\nfunction g() {}\n");
        let resolved = resolve_pending("r", &[a]);
        let call_edges: Vec<_> = resolved
            .edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Calls)
            .collect();
        assert_eq!(call_edges.len(), 1);
    }

    #[test]
    fn cyclic_calls_do_not_recurse() {
        let a = fragment(
            "r",
            "a.js",
            "function ping() { pong(); }\nfunction pong() { ping(); }\n",
        );
        let resolved = resolve_pending("r", &[a]);
        assert_eq!(resolved.calls_resolved, 2);
    }
}
