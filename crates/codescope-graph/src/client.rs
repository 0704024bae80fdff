//! Neo4j graph store client.
//!
//! Typed property-graph CRUD plus parameterized, bounded traversals over
//! bolt. Node identity is the deterministic composite id from
//! [`codescope_core::model`]; every write is a MERGE keyed on it, so
//! re-ingestion is idempotent.
//!
//! Cypher cannot parameterize relationship types or variable-length bounds;
//! those fragments are spliced only after validation against the [`EdgeType`]
//! enum and the depth range, everything else travels as bolt parameters.
//! Integer-shaped values cross the boundary as `i64` and are normalized at
//! the row edge.

use neo4rs::{query, Graph, Query};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use codescope_core::model::{EdgeProps, EdgeType, GraphEdge, GraphNode, NodeLabel};

use crate::error::{GraphError, Result};

/// Maximum traversal depth the store accepts.
pub const MAX_TRAVERSE_DEPTH: u32 = 5;

/// Default traversal result cap.
pub const DEFAULT_TRAVERSE_LIMIT: u32 = 100;

/// Relationship types that constitute a dependency.
pub const DEPENDENCY_TYPES: &[EdgeType] = &[
    EdgeType::Imports,
    EdgeType::Calls,
    EdgeType::Extends,
    EdgeType::Implements,
    EdgeType::References,
];

/// Connection configuration for the graph store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStoreConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 7687,
            username: "neo4j".into(),
            password: "neo4j".into(),
        }
    }
}

impl GraphStoreConfig {
    pub fn uri(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Traversal direction relative to the start node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraverseDirection {
    Outgoing,
    Incoming,
    Both,
}

/// Bounded traversal input.
#[derive(Debug, Clone)]
pub struct TraverseInput {
    pub start_id: String,
    /// Relationship whitelist; `None` allows every type.
    pub relationship_types: Option<Vec<EdgeType>>,
    pub direction: TraverseDirection,
    /// 1–5.
    pub max_depth: u32,
    pub limit: u32,
}

impl TraverseInput {
    pub fn outgoing(start_id: impl Into<String>, max_depth: u32) -> Self {
        Self {
            start_id: start_id.into(),
            relationship_types: None,
            direction: TraverseDirection::Outgoing,
            max_depth,
            limit: DEFAULT_TRAVERSE_LIMIT,
        }
    }

    pub fn incoming(start_id: impl Into<String>, max_depth: u32) -> Self {
        Self {
            direction: TraverseDirection::Incoming,
            ..Self::outgoing(start_id, max_depth)
        }
    }

    pub fn with_types(mut self, types: Vec<EdgeType>) -> Self {
        self.relationship_types = Some(types);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.start_id.is_empty() {
            return Err(GraphError::Validation("start id must not be empty".into()));
        }
        if !(1..=MAX_TRAVERSE_DEPTH).contains(&self.max_depth) {
            return Err(GraphError::Validation(format!(
                "depth must be between 1 and {MAX_TRAVERSE_DEPTH}"
            )));
        }
        if self.limit == 0 {
            return Err(GraphError::Validation("limit must be positive".into()));
        }
        Ok(())
    }
}

/// One node reached by a traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalHit {
    pub node_id: String,
    pub label: String,
    pub name: String,
    pub relationship_type: String,
    pub depth: u32,
}

/// Minimal node description for lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub label: String,
    pub name: String,
}

/// Immediate neighborhood of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeContext {
    pub node: NodeSummary,
    pub outgoing: Vec<TraversalHit>,
    pub incoming: Vec<TraversalHit>,
}

// ============================================================================
// Cypher builders (pure, unit-tested)
// ============================================================================

/// Relationship pattern fragment from a validated whitelist.
fn rel_pattern(types: Option<&[EdgeType]>) -> String {
    match types {
        None => String::new(),
        Some(list) if list.is_empty() => String::new(),
        Some(list) => {
            let joined = list
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join("|");
            format!(":{joined}")
        }
    }
}

/// Variable-length traversal query. Depth and types are validated before
/// splicing; `$start` and `$limit` remain parameters.
pub(crate) fn traverse_cypher(input: &TraverseInput) -> String {
    let rels = rel_pattern(input.relationship_types.as_deref());
    let pattern = match input.direction {
        TraverseDirection::Outgoing => format!("(start)-[rels{rels}*1..{}]->(n)", input.max_depth),
        TraverseDirection::Incoming => format!("(start)<-[rels{rels}*1..{}]-(n)", input.max_depth),
        TraverseDirection::Both => format!("(start)-[rels{rels}*1..{}]-(n)", input.max_depth),
    };
    format!(
        "MATCH (start {{id: $start}}) \
         MATCH {pattern} \
         WHERE n.id <> $start \
         RETURN n.id AS id, head(labels(n)) AS label, \
                coalesce(n.name, n.path, n.id) AS name, \
                min(size(rels)) AS depth, min(type(last(rels))) AS relationship \
         ORDER BY depth ASC, id ASC \
         LIMIT $limit"
    )
}

/// Shortest-path query between two ids, undirected, bounded hops.
pub(crate) fn shortest_path_cypher(max_hops: u32, types: Option<&[EdgeType]>) -> String {
    let rels = rel_pattern(types);
    format!(
        "MATCH (a {{id: $from}}), (b {{id: $to}}) \
         MATCH p = shortestPath((a)-[{rels}*..{max_hops}]-(b)) \
         RETURN [n IN nodes(p) | n.id] AS ids, \
                [r IN relationships(p) | type(r)] AS rels"
    )
}

/// MERGE query for a node, keyed on its composite id.
pub(crate) fn merge_node_query(node: &GraphNode) -> Query {
    let label = node.label();
    let id = node.id();
    match node {
        GraphNode::Repository {
            name,
            url,
            status,
            last_indexed,
        } => query(&format!(
            "MERGE (n:{label} {{id: $id}}) \
             SET n.name = $name, n.url = $url, n.status = $status, n.last_indexed = $last_indexed"
        ))
        .param("id", id)
        .param("name", name.clone())
        .param("url", url.clone())
        .param("status", status.as_str())
        .param("last_indexed", last_indexed.clone().unwrap_or_default()),
        GraphNode::File {
            repo,
            path,
            extension,
            hash,
        } => query(&format!(
            "MERGE (n:{label} {{id: $id}}) \
             SET n.repo = $repo, n.path = $path, n.extension = $extension, n.hash = $hash"
        ))
        .param("id", id)
        .param("repo", repo.clone())
        .param("path", path.clone())
        .param("extension", extension.clone())
        .param("hash", hash.clone()),
        GraphNode::Function {
            repo,
            file,
            name,
            signature,
            start_line,
            end_line,
        } => query(&format!(
            "MERGE (n:{label} {{id: $id}}) \
             SET n.repo = $repo, n.file = $file, n.name = $name, n.signature = $signature, \
                 n.start_line = $start_line, n.end_line = $end_line"
        ))
        .param("id", id)
        .param("repo", repo.clone())
        .param("file", file.clone())
        .param("name", name.clone())
        .param("signature", signature.clone())
        .param("start_line", i64::from(*start_line))
        .param("end_line", i64::from(*end_line)),
        GraphNode::Class {
            repo,
            file,
            name,
            kind,
            start_line,
            end_line,
        } => query(&format!(
            "MERGE (n:{label} {{id: $id}}) \
             SET n.repo = $repo, n.file = $file, n.name = $name, n.kind = $kind, \
                 n.start_line = $start_line, n.end_line = $end_line"
        ))
        .param("id", id)
        .param("repo", repo.clone())
        .param("file", file.clone())
        .param("name", name.clone())
        .param("kind", kind.as_str())
        .param("start_line", i64::from(*start_line))
        .param("end_line", i64::from(*end_line)),
        GraphNode::Module {
            name,
            origin,
            version,
        } => query(&format!(
            "MERGE (n:{label} {{id: $id}}) \
             SET n.name = $name, n.origin = $origin, n.version = $version"
        ))
        .param("id", id)
        .param("name", name.clone())
        .param("origin", origin.as_str())
        .param("version", version.clone().unwrap_or_default()),
        GraphNode::Chunk {
            repo,
            file,
            chunk_index,
            vector_id,
        } => query(&format!(
            "MERGE (n:{label} {{id: $id}}) \
             SET n.repo = $repo, n.file = $file, n.chunk_index = $chunk_index, \
                 n.vector_id = $vector_id"
        ))
        .param("id", id)
        .param("repo", repo.clone())
        .param("file", file.clone())
        .param("chunk_index", i64::from(*chunk_index))
        .param("vector_id", vector_id.clone()),
        GraphNode::Concept {
            name,
            description,
            confidence,
        } => query(&format!(
            "MERGE (n:{label} {{id: $id}}) \
             SET n.name = $name, n.description = $description, n.confidence = $confidence"
        ))
        .param("id", id)
        .param("name", name.clone())
        .param("description", description.clone().unwrap_or_default())
        .param("confidence", confidence.unwrap_or(0.0)),
    }
}

/// MERGE query for a typed edge between two existing node ids.
pub(crate) fn merge_edge_query(edge: &GraphEdge) -> Query {
    let rel = edge.edge_type.as_str();
    let set = match &edge.props {
        EdgeProps::None => "",
        EdgeProps::Defines { .. } => " SET r.start_line = $start_line, r.end_line = $end_line",
        EdgeProps::Imports { .. } => " SET r.import_type = $import_type, r.symbols = $symbols",
        EdgeProps::Calls { .. } => " SET r.call_count = $call_count, r.is_async = $is_async",
        EdgeProps::HasChunk { .. } => " SET r.chunk_index = $chunk_index",
        EdgeProps::TaggedWith { .. } => " SET r.confidence = $confidence",
        EdgeProps::RelatedTo { .. } => " SET r.similarity = $similarity, r.kind = $kind",
    };
    let cypher = format!(
        "MATCH (a {{id: $from}}) MATCH (b {{id: $to}}) MERGE (a)-[r:{rel}]->(b){set}"
    );
    let q = query(&cypher)
        .param("from", edge.from.clone())
        .param("to", edge.to.clone());
    match &edge.props {
        EdgeProps::None => q,
        EdgeProps::Defines {
            start_line,
            end_line,
        } => q
            .param("start_line", i64::from(*start_line))
            .param("end_line", i64::from(*end_line)),
        EdgeProps::Imports { kind, symbols } => q
            .param("import_type", kind.as_str())
            .param("symbols", symbols.clone()),
        EdgeProps::Calls {
            call_count,
            is_async,
        } => q
            .param("call_count", i64::from(*call_count))
            .param("is_async", *is_async),
        EdgeProps::HasChunk { chunk_index } => q.param("chunk_index", i64::from(*chunk_index)),
        EdgeProps::TaggedWith { confidence } => q.param("confidence", *confidence),
        EdgeProps::RelatedTo { similarity, kind } => {
            q.param("similarity", *similarity).param("kind", kind.clone())
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Bolt-backed graph store client.
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect and verify with a round trip.
    pub async fn connect(config: GraphStoreConfig) -> Result<Self> {
        info!("connecting to graph store at {}", config.uri());
        let graph = Graph::new(&config.uri(), &config.username, &config.password)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;
        let client = Self { graph };
        client.health_check().await?;
        info!("connected to graph store");
        Ok(client)
    }

    pub async fn health_check(&self) -> Result<bool> {
        let mut rows = self.graph.execute(query("RETURN 1 AS one")).await?;
        Ok(rows.next().await?.is_some())
    }

    /// Upsert a single node outside any batch.
    pub async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        self.graph.run(merge_node_query(node)).await?;
        Ok(())
    }

    /// Delete a node and all its relationships.
    pub async fn delete_node(&self, id: &str) -> Result<()> {
        self.graph
            .run(query("MATCH (n {id: $id}) DETACH DELETE n").param("id", id))
            .await?;
        Ok(())
    }

    /// Create (or refresh) one relationship.
    pub async fn create_relationship(&self, edge: &GraphEdge) -> Result<()> {
        self.graph.run(merge_edge_query(edge)).await?;
        Ok(())
    }

    /// Delete a specific relationship between two ids.
    pub async fn delete_relationship(
        &self,
        from: &str,
        to: &str,
        edge_type: EdgeType,
    ) -> Result<()> {
        let cypher = format!(
            "MATCH (a {{id: $from}})-[r:{}]->(b {{id: $to}}) DELETE r",
            edge_type.as_str()
        );
        self.graph
            .run(query(&cypher).param("from", from).param("to", to))
            .await?;
        Ok(())
    }

    /// Run a batch of write queries inside one transaction. A failing batch
    /// rolls back atomically.
    pub async fn run_batch(&self, queries: Vec<Query>) -> Result<()> {
        if queries.is_empty() {
            return Ok(());
        }
        let count = queries.len();
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| GraphError::Transaction(e.to_string()))?;
        match txn.run_queries(queries).await {
            Ok(()) => {
                txn.commit()
                    .await
                    .map_err(|e| GraphError::Transaction(e.to_string()))?;
                debug!("committed batch of {count} queries");
                Ok(())
            }
            Err(e) => {
                let _ = txn.rollback().await;
                Err(GraphError::Transaction(e.to_string()))
            }
        }
    }

    /// Read query pass-through.
    pub async fn run_query(&self, q: Query) -> Result<Vec<neo4rs::Row>> {
        let mut stream = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Look up a node by id.
    pub async fn find_node(&self, id: &str) -> Result<Option<NodeSummary>> {
        let rows = self
            .run_query(
                query(
                    "MATCH (n {id: $id}) \
                     RETURN n.id AS id, head(labels(n)) AS label, \
                            coalesce(n.name, n.path, n.id) AS name",
                )
                .param("id", id),
            )
            .await?;
        Ok(rows.first().map(row_to_summary))
    }

    /// Stored content hash of a file node, if present.
    pub async fn file_hash(&self, repo: &str, path: &str) -> Result<Option<String>> {
        let file_id = format!("File:{repo}:{path}");
        let rows = self
            .run_query(
                query("MATCH (f:File {id: $fid}) RETURN f.hash AS hash").param("fid", file_id),
            )
            .await?;
        Ok(rows.first().and_then(|row| row.get::<String>("hash").ok()))
    }

    /// Bounded traversal with type whitelist and result cap.
    pub async fn traverse(&self, input: &TraverseInput) -> Result<Vec<TraversalHit>> {
        input.validate()?;
        let cypher = traverse_cypher(input);
        let rows = self
            .run_query(
                query(&cypher)
                    .param("start", input.start_id.clone())
                    .param("limit", i64::from(input.limit)),
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| TraversalHit {
                node_id: row.get::<String>("id").unwrap_or_default(),
                label: row.get::<String>("label").unwrap_or_default(),
                name: row.get::<String>("name").unwrap_or_default(),
                relationship_type: row.get::<String>("relationship").unwrap_or_default(),
                depth: row.get::<i64>("depth").unwrap_or(0).max(0) as u32,
            })
            .collect())
    }

    /// Forward dependency edges from an entity.
    pub async fn analyze_dependencies(
        &self,
        start_id: &str,
        max_depth: u32,
        limit: u32,
    ) -> Result<Vec<TraversalHit>> {
        let input = TraverseInput::outgoing(start_id, max_depth)
            .with_types(DEPENDENCY_TYPES.to_vec())
            .with_limit(limit);
        self.traverse(&input).await
    }

    /// A node plus its depth-1 neighborhood in both directions.
    pub async fn get_context(&self, id: &str) -> Result<NodeContext> {
        let node = self
            .find_node(id)
            .await?
            .ok_or_else(|| GraphError::NotFound(format!("node '{id}'")))?;
        let outgoing = self.traverse(&TraverseInput::outgoing(id, 1)).await?;
        let incoming = self.traverse(&TraverseInput::incoming(id, 1)).await?;
        Ok(NodeContext {
            node,
            outgoing,
            incoming,
        })
    }

    /// Delete a file's graph scope: its DEFINES-owned entities, chunks and
    /// the File node itself. Guarantees I5 when run before re-insertion.
    pub async fn delete_file_scope(&self, repo: &str, path: &str) -> Result<()> {
        let file_id = format!("File:{repo}:{path}");
        self.graph
            .run(
                query(
                    "MATCH (f:File {id: $fid}) \
                     OPTIONAL MATCH (f)-[:DEFINES]->(e) \
                     OPTIONAL MATCH (f)-[:HAS_CHUNK]->(c:Chunk) \
                     DETACH DELETE e, c, f",
                )
                .param("fid", file_id),
            )
            .await?;
        Ok(())
    }

    /// Delete everything belonging to a repository.
    pub async fn delete_repository_scope(&self, repo: &str) -> Result<()> {
        let repo_id = format!("Repository:{repo}");
        self.graph
            .run(
                query(
                    "MATCH (r:Repository {id: $rid}) \
                     OPTIONAL MATCH (r)-[:CONTAINS]->(f:File) \
                     OPTIONAL MATCH (f)-[:DEFINES]->(e) \
                     OPTIONAL MATCH (f)-[:HAS_CHUNK]->(c:Chunk) \
                     DETACH DELETE e, c, f, r",
                )
                .param("rid", repo_id),
            )
            .await?;
        // Modules imported only by this repo are now orphaned.
        self.graph
            .run(query(
                "MATCH (m:Module) WHERE NOT ()-[:IMPORTS]->(m) DELETE m",
            ))
            .await?;
        Ok(())
    }

    /// Count nodes of one label scoped to a repository.
    pub async fn count_label(&self, repo: &str, label: NodeLabel) -> Result<u64> {
        let cypher = match label {
            NodeLabel::Repository => {
                "MATCH (n:Repository {name: $repo}) RETURN count(n) AS c".to_string()
            }
            NodeLabel::Module => {
                "MATCH (:File {repo: $repo})-[:IMPORTS]->(m:Module) \
                 RETURN count(DISTINCT m) AS c"
                    .to_string()
            }
            other => format!("MATCH (n:{other}) WHERE n.repo = $repo RETURN count(n) AS c"),
        };
        let rows = self.run_query(query(&cypher).param("repo", repo)).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get::<i64>("c").ok())
            .unwrap_or(0)
            .max(0) as u64)
    }

    /// Count edges of one type whose source belongs to a repository.
    pub async fn count_edges(&self, repo: &str, edge_type: EdgeType) -> Result<u64> {
        let cypher = format!(
            "MATCH (a)-[r:{}]->() WHERE a.repo = $repo OR a.name = $repo RETURN count(r) AS c",
            edge_type.as_str()
        );
        let rows = self.run_query(query(&cypher).param("repo", repo)).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get::<i64>("c").ok())
            .unwrap_or(0)
            .max(0) as u64)
    }
}

fn row_to_summary(row: &neo4rs::Row) -> NodeSummary {
    NodeSummary {
        id: row.get::<String>("id").unwrap_or_default(),
        label: row.get::<String>("label").unwrap_or_default(),
        name: row.get::<String>("name").unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescope_core::model::ImportKind;

    #[test]
    fn traverse_validation_boundaries() {
        let ok = TraverseInput::outgoing("File:r:a.ts", 1);
        assert!(ok.validate().is_ok());
        let ok = TraverseInput::outgoing("File:r:a.ts", 5);
        assert!(ok.validate().is_ok());

        let zero = TraverseInput::outgoing("File:r:a.ts", 0);
        assert!(zero.validate().is_err());
        let six = TraverseInput::outgoing("File:r:a.ts", 6);
        assert!(six.validate().is_err());
        let empty = TraverseInput::outgoing("", 1);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn traverse_cypher_splices_validated_depth_and_types() {
        let input = TraverseInput::outgoing("x", 3)
            .with_types(vec![EdgeType::Imports, EdgeType::Calls]);
        let cypher = traverse_cypher(&input);
        assert!(cypher.contains("[rels:IMPORTS|CALLS*1..3]->"));
        assert!(cypher.contains("ORDER BY depth ASC, id ASC"));
        assert!(cypher.contains("LIMIT $limit"));
    }

    #[test]
    fn traverse_cypher_incoming_reverses_arrow() {
        let input = TraverseInput::incoming("x", 2);
        let cypher = traverse_cypher(&input);
        assert!(cypher.contains("<-[rels*1..2]-"));
    }

    #[test]
    fn empty_whitelist_means_all_types() {
        let mut input = TraverseInput::outgoing("x", 1);
        input.relationship_types = Some(vec![]);
        let cypher = traverse_cypher(&input);
        assert!(cypher.contains("[rels*1..1]->"));
    }

    #[test]
    fn shortest_path_bounds_hops() {
        let cypher = shortest_path_cypher(20, Some(&[EdgeType::Calls]));
        assert!(cypher.contains("shortestPath"));
        assert!(cypher.contains("[:CALLS*..20]"));
    }

    #[test]
    fn node_ids_drive_merge_keys() {
        // The generated cypher always merges on the composite id, never on
        // mutable properties.
        let node = GraphNode::File {
            repo: "r1".into(),
            path: "src/a.ts".into(),
            extension: "ts".into(),
            hash: "h".into(),
        };
        // Query internals are opaque; building it must not panic and the
        // builder is driven by the same id used for lookups.
        let _ = merge_node_query(&node);
        assert_eq!(node.id(), "File:r1:src/a.ts");
    }

    #[test]
    fn edge_query_builds_for_all_prop_shapes() {
        let edges = vec![
            GraphEdge::new("a", "b", EdgeType::Contains),
            GraphEdge::new("a", "b", EdgeType::Defines).with_props(EdgeProps::Defines {
                start_line: 1,
                end_line: 2,
            }),
            GraphEdge::new("a", "b", EdgeType::Imports).with_props(EdgeProps::Imports {
                kind: ImportKind::Named,
                symbols: vec!["x".into()],
            }),
            GraphEdge::new("a", "b", EdgeType::Calls).with_props(EdgeProps::Calls {
                call_count: 3,
                is_async: true,
            }),
            GraphEdge::new("a", "b", EdgeType::HasChunk)
                .with_props(EdgeProps::HasChunk { chunk_index: 0 }),
        ];
        for edge in edges {
            let _ = merge_edge_query(&edge);
        }
    }
}
