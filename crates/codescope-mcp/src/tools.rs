//! MCP tool parameter definitions
//!
//! These structs define the JSON Schema for tool parameters using schemars.
//! Bounds and defaults documented here are enforced again by the underlying
//! services; the schema is the client-facing contract.

use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

/// Parameters for the semantic_search tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SemanticSearchParams {
    /// Search query text
    #[schemars(description = "Natural-language or code query (1-1000 characters)")]
    pub query: String,

    /// Repositories to search
    #[schemars(
        description = "Repository names to search. Omit to search every indexed repository."
    )]
    pub repositories: Option<Vec<String>>,

    /// Maximum results
    #[schemars(description = "Maximum results to return, 1-50 (default 10)")]
    pub limit: Option<usize>,

    /// Minimum similarity
    #[schemars(description = "Minimum similarity threshold, 0.0-1.0 (default 0.0)")]
    pub threshold: Option<f32>,

    /// File extension filter
    #[schemars(description = "Restrict results to one file extension (e.g. \"ts\")")]
    pub file_extension: Option<String>,
}

/// Parameters for the get_dependencies tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetDependenciesParams {
    /// Entity to analyze
    #[schemars(
        description = "Entity reference: a node id, an entity name, or a file path"
    )]
    pub entity: String,

    /// Repository the entity belongs to
    #[schemars(description = "Repository name")]
    pub repository: String,

    /// Traversal depth
    #[schemars(description = "Traversal depth, 1-5 (default 1; >1 is transitive)")]
    pub depth: Option<u32>,

    /// Relationship filter
    #[schemars(
        description = "Relationship type whitelist (e.g. [\"IMPORTS\", \"CALLS\"]). Omit for all dependency types."
    )]
    pub relationship_types: Option<Vec<String>>,
}

/// Parameters for the get_dependents tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetDependentsParams {
    /// Entity to analyze
    #[schemars(description = "Entity reference: a node id, an entity name, or a file path")]
    pub entity: String,

    /// Repository the entity belongs to
    #[schemars(description = "Repository name (omit when passing a full node id)")]
    pub repository: Option<String>,

    /// Traversal depth
    #[schemars(description = "Traversal depth, 1-5 (default 1)")]
    pub depth: Option<u32>,

    /// Include other repositories
    #[schemars(description = "Include dependents from other repositories (default false)")]
    pub include_cross_repo: Option<bool>,
}

/// Parameters for the get_path tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetPathParams {
    /// Source node id
    #[schemars(description = "Start node id (e.g. \"Function:repo:src/a.ts:main:3\")")]
    pub from: String,

    /// Target node id
    #[schemars(description = "Target node id")]
    pub to: String,

    /// Hop bound
    #[schemars(description = "Maximum path length, 1-20 (default 5)")]
    pub max_hops: Option<u32>,

    /// Relationship filter
    #[schemars(description = "Relationship type whitelist. Omit for all types.")]
    pub relationship_types: Option<Vec<String>>,
}

/// Parameters for the get_architecture tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetArchitectureParams {
    /// Repository to describe
    #[schemars(description = "Repository name")]
    pub repository: String,

    /// Path scope
    #[schemars(description = "Restrict to a path prefix (e.g. \"src/\")")]
    pub scope: Option<String>,

    /// Granularity
    #[schemars(
        description = "Detail level: \"packages\", \"modules\", \"files\" or \"entities\" (default \"modules\")"
    )]
    pub detail_level: Option<String>,

    /// Include registry packages
    #[schemars(description = "Include external packages in the result (default true)")]
    pub include_external: Option<bool>,
}

/// Parameters for the get_graph_metrics tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetGraphMetricsParams {
    /// Repository to measure
    #[schemars(description = "Repository name")]
    pub repository: String,
}

/// Parameters for the index_repository tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexRepositoryParams {
    /// Repository URL
    #[schemars(description = "Clone URL (https or ssh)")]
    pub url: String,

    /// Catalog name
    #[schemars(description = "Name for the repository (default: derived from the URL)")]
    pub name: Option<String>,

    /// Branch to index
    #[schemars(description = "Branch to index (default: the clone's default branch)")]
    pub branch: Option<String>,

    /// Replace existing state
    #[schemars(description = "Replace an already-indexed repository (default false)")]
    pub force: Option<bool>,
}

/// Parameters for the update_repository tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateRepositoryParams {
    /// Repository to update
    #[schemars(description = "Repository name")]
    pub name: String,

    /// Full re-index
    #[schemars(description = "Force a full re-index instead of an incremental update")]
    pub force: Option<bool>,
}

/// Parameters for the get_update_status tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetUpdateStatusParams {
    /// Job to inspect
    #[schemars(description = "Job id returned by update_repository")]
    pub job_id: String,
}

/// Parameters for the remove_repository tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoveRepositoryParams {
    /// Repository to remove
    #[schemars(description = "Repository name to remove from both stores")]
    pub name: String,
}

/// Parameters for the list_repositories tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListRepositoriesParams {}
