//! Graph query service.
//!
//! Four read operations over the graph client: dependencies, dependents,
//! path and architecture, plus repository-level metrics. Every call
//! validates its input first, runs one bounded traversal, and reports
//! `{query_time_ms, from_cache}`. A small LRU keyed by the normalized query
//! serves repeated calls; only successful results are cached, so the cache
//! can never hide errors. Tie-breaks are lexicographic by node id.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use neo4rs::query;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use codescope_core::model::{EdgeType, NodeLabel};

use crate::client::{
    GraphClient, TraverseInput, TraversalHit, DEFAULT_TRAVERSE_LIMIT, DEPENDENCY_TYPES,
    MAX_TRAVERSE_DEPTH,
};
use crate::error::{GraphError, Result};

/// Cache capacity (normalized query → serialized result).
const CACHE_CAPACITY: usize = 256;

/// Maximum hops accepted by `get_path`.
pub const MAX_PATH_HOPS: u32 = 20;

/// Timing and provenance attached to every query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub query_time_ms: u64,
    pub from_cache: bool,
}

/// Architecture granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Packages,
    Modules,
    Files,
    Entities,
}

impl DetailLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "packages" => Some(DetailLevel::Packages),
            "modules" => Some(DetailLevel::Modules),
            "files" => Some(DetailLevel::Files),
            "entities" => Some(DetailLevel::Entities),
            _ => None,
        }
    }
}

/// One dependency/dependent item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedItem {
    /// Node label ("File", "Function", "Class", "Module").
    pub r#type: String,
    /// Path or name of the node.
    pub path: String,
    pub relationship_type: String,
    pub depth: u32,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependenciesResult {
    pub entity: String,
    pub repository: String,
    pub items: Vec<RelatedItem>,
    pub metrics: QueryMetrics,
}

/// Reverse-reachability summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub direct_impact_count: usize,
    pub transitive_impact_count: usize,
    /// Normalized to [0,1]: transitive count against a 50-dependent scale.
    pub impact_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentsResult {
    pub entity: String,
    pub items: Vec<RelatedItem>,
    pub impact_analysis: ImpactAnalysis,
    pub metrics: QueryMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResult {
    pub path_exists: bool,
    /// Node ids along the path, when one exists.
    pub path: Option<Vec<String>>,
    /// Relationship types along the path.
    pub relationships: Vec<String>,
    pub hops: u32,
    pub metrics: QueryMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureModule {
    pub name: String,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDependency {
    pub from: String,
    pub to: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureResult {
    pub repository: String,
    pub detail_level: DetailLevel,
    /// Shape depends on the detail level: package names, module summaries,
    /// file paths or per-file entity listings.
    pub items: serde_json::Value,
    pub dependencies: Vec<ModuleDependency>,
    pub metrics_summary: GraphCounts,
    pub metrics: QueryMetrics,
}

/// Node/edge counts for a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphCounts {
    pub nodes: BTreeMap<String, u64>,
    pub relationships: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetricsResult {
    pub repository: String,
    pub counts: GraphCounts,
    pub metrics: QueryMetrics,
}

/// Read-side graph query service.
pub struct GraphQueryService {
    client: Arc<GraphClient>,
    cache: Mutex<LruCache<String, serde_json::Value>>,
}

impl GraphQueryService {
    pub fn new(client: Arc<GraphClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero cache capacity"),
            )),
        }
    }

    /// Forward dependencies of an entity, direct or transitive.
    pub async fn get_dependencies(
        &self,
        entity: &str,
        repository: &str,
        depth: u32,
        relationship_types: Option<Vec<EdgeType>>,
    ) -> Result<DependenciesResult> {
        validate_depth(depth)?;
        let start = Instant::now();
        let cache_key = normalize_key(
            "deps",
            &[
                entity,
                repository,
                &depth.to_string(),
                &types_key(relationship_types.as_deref()),
            ],
        );
        if let Some(mut cached) = self.cache_get::<DependenciesResult>(&cache_key) {
            cached.metrics = QueryMetrics {
                query_time_ms: start.elapsed().as_millis() as u64,
                from_cache: true,
            };
            return Ok(cached);
        }

        let start_id = self.resolve_entity(repository, entity).await?;
        let types = relationship_types.unwrap_or_else(|| DEPENDENCY_TYPES.to_vec());
        let hits = self
            .client
            .traverse(
                &TraverseInput::outgoing(&start_id, depth)
                    .with_types(types)
                    .with_limit(DEFAULT_TRAVERSE_LIMIT),
            )
            .await?;

        let result = DependenciesResult {
            entity: entity.to_string(),
            repository: repository.to_string(),
            items: hits.into_iter().map(to_related).collect(),
            metrics: QueryMetrics {
                query_time_ms: start.elapsed().as_millis() as u64,
                from_cache: false,
            },
        };
        self.cache_put(&cache_key, &result);
        Ok(result)
    }

    /// Reverse edges into an entity with impact analysis.
    pub async fn get_dependents(
        &self,
        entity: &str,
        repository: Option<&str>,
        depth: u32,
        include_cross_repo: bool,
    ) -> Result<DependentsResult> {
        validate_depth(depth)?;
        let start = Instant::now();
        let repo_key = repository.unwrap_or("");
        let cache_key = normalize_key(
            "dependents",
            &[entity, repo_key, &depth.to_string(), &include_cross_repo.to_string()],
        );
        if let Some(mut cached) = self.cache_get::<DependentsResult>(&cache_key) {
            cached.metrics = QueryMetrics {
                query_time_ms: start.elapsed().as_millis() as u64,
                from_cache: true,
            };
            return Ok(cached);
        }

        let start_id = match repository {
            Some(repo) => self.resolve_entity(repo, entity).await?,
            None => self
                .client
                .find_node(entity)
                .await?
                .map(|n| n.id)
                .ok_or_else(|| GraphError::NotFound(format!("entity '{entity}'")))?,
        };

        let hits = self
            .client
            .traverse(
                &TraverseInput::incoming(&start_id, depth)
                    .with_types(DEPENDENCY_TYPES.to_vec())
                    .with_limit(DEFAULT_TRAVERSE_LIMIT),
            )
            .await?;

        // Without cross-repo inclusion, dependents from other repositories
        // are filtered by id prefix comparison against the start's repo.
        let hits: Vec<TraversalHit> = if include_cross_repo {
            hits
        } else {
            let repo_marker = repository.map(|r| format!(":{r}:"));
            hits.into_iter()
                .filter(|h| match &repo_marker {
                    Some(marker) => h.node_id.contains(marker.as_str()),
                    None => true,
                })
                .collect()
        };

        let direct = hits.iter().filter(|h| h.depth == 1).count();
        let transitive = hits.len();
        let result = DependentsResult {
            entity: entity.to_string(),
            items: hits.into_iter().map(to_related).collect(),
            impact_analysis: ImpactAnalysis {
                direct_impact_count: direct,
                transitive_impact_count: transitive,
                impact_score: impact_score(transitive),
            },
            metrics: QueryMetrics {
                query_time_ms: start.elapsed().as_millis() as u64,
                from_cache: false,
            },
        };
        self.cache_put(&cache_key, &result);
        Ok(result)
    }

    /// Shortest path between two entities, if any.
    pub async fn get_path(
        &self,
        from: &str,
        to: &str,
        max_hops: u32,
        relationship_types: Option<Vec<EdgeType>>,
    ) -> Result<PathResult> {
        if !(1..=MAX_PATH_HOPS).contains(&max_hops) {
            return Err(GraphError::Validation(format!(
                "max_hops must be between 1 and {MAX_PATH_HOPS}"
            )));
        }
        let start = Instant::now();

        let cypher =
            crate::client::shortest_path_cypher(max_hops, relationship_types.as_deref());
        let rows = self
            .client
            .run_query(query(&cypher).param("from", from).param("to", to))
            .await?;

        let result = match rows.first() {
            Some(row) => {
                let ids: Vec<String> = row.get("ids").unwrap_or_default();
                let rels: Vec<String> = row.get("rels").unwrap_or_default();
                PathResult {
                    path_exists: true,
                    hops: rels.len() as u32,
                    path: Some(ids),
                    relationships: rels,
                    metrics: QueryMetrics {
                        query_time_ms: start.elapsed().as_millis() as u64,
                        from_cache: false,
                    },
                }
            }
            None => PathResult {
                path_exists: false,
                path: None,
                relationships: Vec::new(),
                hops: 0,
                metrics: QueryMetrics {
                    query_time_ms: start.elapsed().as_millis() as u64,
                    from_cache: false,
                },
            },
        };
        Ok(result)
    }

    /// Hierarchical structure plus inter-module dependencies.
    pub async fn get_architecture(
        &self,
        repository: &str,
        scope: Option<&str>,
        detail_level: DetailLevel,
        include_external: bool,
    ) -> Result<ArchitectureResult> {
        let start = Instant::now();

        let items = match detail_level {
            DetailLevel::Packages => {
                let mut rows = self
                    .client
                    .run_query(
                        query(
                            "MATCH (:File {repo: $repo})-[:IMPORTS]->(m:Module) \
                             RETURN DISTINCT m.name AS name, m.origin AS origin \
                             ORDER BY name ASC",
                        )
                        .param("repo", repository),
                    )
                    .await?;
                rows.retain(|row| {
                    include_external
                        || row.get::<String>("origin").unwrap_or_default() != "npm"
                });
                serde_json::json!(rows
                    .iter()
                    .map(|row| {
                        serde_json::json!({
                            "name": row.get::<String>("name").unwrap_or_default(),
                            "origin": row.get::<String>("origin").unwrap_or_default(),
                        })
                    })
                    .collect::<Vec<_>>())
            }
            DetailLevel::Modules => {
                let paths = self.file_paths(repository, scope).await?;
                let mut modules: BTreeMap<String, usize> = BTreeMap::new();
                for path in &paths {
                    *modules.entry(top_level_dir(path)).or_default() += 1;
                }
                serde_json::json!(modules
                    .into_iter()
                    .map(|(name, files)| ArchitectureModule { name, files })
                    .collect::<Vec<_>>())
            }
            DetailLevel::Files => {
                serde_json::json!(self.file_paths(repository, scope).await?)
            }
            DetailLevel::Entities => {
                let rows = self
                    .client
                    .run_query(
                        query(
                            "MATCH (f:File {repo: $repo})-[:DEFINES]->(e) \
                             RETURN f.path AS path, head(labels(e)) AS label, \
                                    e.name AS name \
                             ORDER BY path ASC, name ASC",
                        )
                        .param("repo", repository),
                    )
                    .await?;
                let mut by_file: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
                for row in &rows {
                    let path: String = row.get("path").unwrap_or_default();
                    if let Some(scope_prefix) = scope {
                        if !path.starts_with(scope_prefix) {
                            continue;
                        }
                    }
                    by_file.entry(path).or_default().push(serde_json::json!({
                        "label": row.get::<String>("label").unwrap_or_default(),
                        "name": row.get::<String>("name").unwrap_or_default(),
                    }));
                }
                serde_json::json!(by_file)
            }
        };

        let dependencies = self.module_dependencies(repository).await?;
        let metrics_summary = self.counts(repository).await?;

        Ok(ArchitectureResult {
            repository: repository.to_string(),
            detail_level,
            items,
            dependencies,
            metrics_summary,
            metrics: QueryMetrics {
                query_time_ms: start.elapsed().as_millis() as u64,
                from_cache: false,
            },
        })
    }

    /// Node/edge counts by label/type for one repository.
    pub async fn get_graph_metrics(&self, repository: &str) -> Result<GraphMetricsResult> {
        let start = Instant::now();
        let counts = self.counts(repository).await?;
        Ok(GraphMetricsResult {
            repository: repository.to_string(),
            counts,
            metrics: QueryMetrics {
                query_time_ms: start.elapsed().as_millis() as u64,
                from_cache: false,
            },
        })
    }

    /// Drop all cached query results (used after writes).
    pub fn invalidate_cache(&self) {
        self.cache.lock().clear();
    }

    async fn counts(&self, repository: &str) -> Result<GraphCounts> {
        let mut counts = GraphCounts::default();
        for label in NodeLabel::all() {
            let n = self.client.count_label(repository, *label).await?;
            if n > 0 || matches!(label, NodeLabel::File | NodeLabel::Function | NodeLabel::Class) {
                counts.nodes.insert(label.as_str().to_string(), n);
            }
        }
        for edge_type in EdgeType::all() {
            let n = self.client.count_edges(repository, *edge_type).await?;
            if n > 0 {
                counts.relationships.insert(edge_type.as_str().to_string(), n);
            }
        }
        Ok(counts)
    }

    async fn file_paths(&self, repository: &str, scope: Option<&str>) -> Result<Vec<String>> {
        let rows = self
            .client
            .run_query(
                query("MATCH (f:File {repo: $repo}) RETURN f.path AS path ORDER BY path ASC")
                    .param("repo", repository),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get::<String>("path").ok())
            .filter(|p| scope.map(|s| p.starts_with(s)).unwrap_or(true))
            .collect())
    }

    /// Inter-module dependency counts from file-level REFERENCES edges.
    async fn module_dependencies(&self, repository: &str) -> Result<Vec<ModuleDependency>> {
        let rows = self
            .client
            .run_query(
                query(
                    "MATCH (a:File {repo: $repo})-[:REFERENCES]->(b:File {repo: $repo}) \
                     RETURN a.path AS from, b.path AS to",
                )
                .param("repo", repository),
            )
            .await?;
        let mut agg: BTreeMap<(String, String), usize> = BTreeMap::new();
        for row in &rows {
            let from = top_level_dir(&row.get::<String>("from").unwrap_or_default());
            let to = top_level_dir(&row.get::<String>("to").unwrap_or_default());
            if from != to {
                *agg.entry((from, to)).or_default() += 1;
            }
        }
        Ok(agg
            .into_iter()
            .map(|((from, to), count)| ModuleDependency { from, to, count })
            .collect())
    }

    /// Resolve an entity reference (node id, entity name or file path) to a
    /// node id, deterministically (smallest id on ambiguity).
    async fn resolve_entity(&self, repository: &str, entity: &str) -> Result<String> {
        if let Some(node) = self.client.find_node(entity).await? {
            return Ok(node.id);
        }
        let rows = self
            .client
            .run_query(
                query(
                    "MATCH (n) WHERE n.repo = $repo AND (n.name = $entity OR n.path = $entity) \
                     RETURN n.id AS id ORDER BY id ASC LIMIT 1",
                )
                .param("repo", repository)
                .param("entity", entity),
            )
            .await?;
        rows.first()
            .and_then(|row| row.get::<String>("id").ok())
            .ok_or_else(|| {
                GraphError::NotFound(format!("entity '{entity}' in repository '{repository}'"))
            })
    }

    fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut cache = self.cache.lock();
        let value = cache.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => {
                debug!("query cache hit: {key}");
                Some(v)
            }
            Err(_) => None,
        }
    }

    fn cache_put<T: Serialize>(&self, key: &str, value: &T) {
        if let Ok(json) = serde_json::to_value(value) {
            self.cache.lock().put(key.to_string(), json);
        }
    }
}

fn to_related(hit: TraversalHit) -> RelatedItem {
    RelatedItem {
        r#type: hit.label,
        path: hit.name,
        relationship_type: hit.relationship_type,
        depth: hit.depth,
        node_id: hit.node_id,
    }
}

fn validate_depth(depth: u32) -> Result<()> {
    if !(1..=MAX_TRAVERSE_DEPTH).contains(&depth) {
        return Err(GraphError::Validation(format!(
            "depth must be between 1 and {MAX_TRAVERSE_DEPTH}"
        )));
    }
    Ok(())
}

/// Normalized cache key: operation + parameters, order-stable.
fn normalize_key(op: &str, parts: &[&str]) -> String {
    format!("{op}::{}", parts.join("\u{1f}"))
}

fn types_key(types: Option<&[EdgeType]>) -> String {
    match types {
        None => "*".to_string(),
        Some(list) => {
            let mut names: Vec<&str> = list.iter().map(|t| t.as_str()).collect();
            names.sort_unstable();
            names.join("|")
        }
    }
}

/// Impact score: transitive dependents against a 50-dependent scale.
fn impact_score(transitive: usize) -> f64 {
    (transitive as f64 / 50.0).min(1.0)
}

fn top_level_dir(path: &str) -> String {
    match path.split_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_validation_boundaries() {
        assert!(validate_depth(1).is_ok());
        assert!(validate_depth(5).is_ok());
        assert!(validate_depth(0).is_err());
        assert!(validate_depth(6).is_err());
    }

    #[test]
    fn impact_score_normalizes_to_unit_interval() {
        assert_eq!(impact_score(0), 0.0);
        assert!(impact_score(25) > 0.0 && impact_score(25) < 1.0);
        assert_eq!(impact_score(50), 1.0);
        assert_eq!(impact_score(500), 1.0);
    }

    #[test]
    fn cache_keys_normalize_type_order() {
        let a = types_key(Some(&[EdgeType::Calls, EdgeType::Imports]));
        let b = types_key(Some(&[EdgeType::Imports, EdgeType::Calls]));
        assert_eq!(a, b);
        assert_eq!(types_key(None), "*");
    }

    #[test]
    fn normalized_keys_distinguish_parameters() {
        let a = normalize_key("deps", &["e", "r", "2", "*"]);
        let b = normalize_key("deps", &["e", "r", "3", "*"]);
        assert_ne!(a, b);
    }

    #[test]
    fn top_level_dir_buckets() {
        assert_eq!(top_level_dir("src/a/b.ts"), "src");
        assert_eq!(top_level_dir("main.ts"), ".");
    }

    #[test]
    fn detail_level_parsing() {
        assert_eq!(DetailLevel::parse("files"), Some(DetailLevel::Files));
        assert_eq!(DetailLevel::parse("packages"), Some(DetailLevel::Packages));
        assert_eq!(DetailLevel::parse("bogus"), None);
    }
}
