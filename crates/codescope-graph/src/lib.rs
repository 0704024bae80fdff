//! codescope-graph - code knowledge graph over Neo4j
//!
//! - [`client`] — typed property-graph CRUD and bounded traversals (bolt)
//! - [`ingest`] — batched, transactional per-repository ingestion with the
//!   call/heritage resolution pass
//! - [`query`] — dependency/dependent/path/architecture queries with an LRU
//!   cache and timing metrics

pub mod client;
pub mod error;
pub mod ingest;
pub mod query;

// Re-exports
pub use client::{
    GraphClient, GraphStoreConfig, NodeContext, NodeSummary, TraversalHit, TraverseDirection,
    TraverseInput, DEPENDENCY_TYPES,
};
pub use error::{BatchContext, GraphError, Result};
pub use ingest::{
    FileError, FileInput, GraphIngestionService, IngestOptions, IngestOutcome, IngestStats,
    RepoLockMap,
};
pub use query::{
    ArchitectureResult, DependenciesResult, DependentsResult, DetailLevel, GraphCounts,
    GraphMetricsResult, GraphQueryService, ImpactAnalysis, PathResult, QueryMetrics, RelatedItem,
};
