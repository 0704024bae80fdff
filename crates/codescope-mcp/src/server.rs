//! codescope MCP server.
//!
//! Exposes semantic search, graph queries and repository lifecycle tools
//! over the rmcp SDK. The adapter holds no business state: every tool
//! validates its arguments, invokes the underlying service, and serializes
//! the result as one indented-JSON text payload. Raised errors map to
//! `isError:true` tool results.

use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use tracing::{info, warn};

use codescope_core::model::EdgeType;
use codescope_graph::{DetailLevel, GraphQueryService};
use codescope_index::{IndexOptions, IngestionService, UpdateCoordinator};
use codescope_search::{SearchRequest, SemanticSearch};

use crate::jobs::JobTracker;
use crate::session::{SessionManager, CLEANUP_INTERVAL_MS};

/// Shared service handles behind the MCP tool surface.
#[derive(Clone)]
pub struct CodescopeServer {
    search: Arc<SemanticSearch>,
    query: Arc<GraphQueryService>,
    ingestion: Arc<IngestionService>,
    updater: Arc<UpdateCoordinator>,
    jobs: Arc<JobTracker>,
    sessions: Arc<SessionManager>,
    tool_router: ToolRouter<Self>,
}

/// Serialize a result into the single-text-payload convention.
fn json_text<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Map a service error to an `isError:true` tool result.
fn error_text(err: impl std::fmt::Display) -> CallToolResult {
    CallToolResult::error(vec![Content::text(err.to_string())])
}

fn parse_edge_types(names: Option<Vec<String>>) -> Result<Option<Vec<EdgeType>>, String> {
    let Some(names) = names else {
        return Ok(None);
    };
    let mut types = Vec::with_capacity(names.len());
    for name in names {
        match EdgeType::parse(&name) {
            Some(t) => types.push(t),
            None => return Err(format!("unknown relationship type '{name}'")),
        }
    }
    Ok(Some(types))
}

#[tool_router]
impl CodescopeServer {
    pub fn new(
        search: Arc<SemanticSearch>,
        query: Arc<GraphQueryService>,
        ingestion: Arc<IngestionService>,
        updater: Arc<UpdateCoordinator>,
    ) -> Self {
        let jobs = Arc::new(JobTracker::new());
        let sessions = Arc::new(SessionManager::new());

        // Interval sweeps are idempotent; the handles die with the runtime.
        let _ = jobs.spawn_sweeper(Duration::from_millis(CLEANUP_INTERVAL_MS));
        let _ = sessions.spawn_sweeper(Duration::from_millis(CLEANUP_INTERVAL_MS));

        Self {
            search,
            query,
            ingestion,
            updater,
            jobs,
            sessions,
            tool_router: Self::tool_router(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn jobs(&self) -> &Arc<JobTracker> {
        &self.jobs
    }

    fn all_repository_names(&self) -> Vec<String> {
        self.ingestion
            .catalog()
            .lock()
            .list()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    // =========================================================================
    // MCP Tools
    // =========================================================================

    #[tool(
        name = "semantic_search",
        description = "Search indexed repositories by meaning. Returns ranked chunks with file locations, line ranges, similarity scores and snippets.\n\nEXAMPLES: semantic_search('retry with exponential backoff'), semantic_search('parse configuration file', repositories=['my-repo'])"
    )]
    async fn semantic_search(
        &self,
        Parameters(params): Parameters<crate::tools::SemanticSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let repositories = match params.repositories {
            Some(repos) if !repos.is_empty() => repos,
            _ => self.all_repository_names(),
        };
        let request = SearchRequest {
            query: params.query,
            repositories,
            limit: params.limit.unwrap_or(10),
            threshold: params.threshold.unwrap_or(0.0),
            file_extension: params.file_extension,
        };
        match self.search.search(request).await {
            Ok(response) => json_text(&response),
            Err(e) => Ok(error_text(e)),
        }
    }

    #[tool(
        name = "get_dependencies",
        description = "What does this entity depend on? Forward IMPORTS/CALLS/EXTENDS/IMPLEMENTS/REFERENCES edges, direct (depth 1) or transitive (depth up to 5)."
    )]
    async fn get_dependencies(
        &self,
        Parameters(params): Parameters<crate::tools::GetDependenciesParams>,
    ) -> Result<CallToolResult, McpError> {
        let types = match parse_edge_types(params.relationship_types) {
            Ok(t) => t,
            Err(message) => return Ok(error_text(message)),
        };
        match self
            .query
            .get_dependencies(
                &params.entity,
                &params.repository,
                params.depth.unwrap_or(1),
                types,
            )
            .await
        {
            Ok(result) => json_text(&result),
            Err(e) => Ok(error_text(e)),
        }
    }

    #[tool(
        name = "get_dependents",
        description = "Who depends on this entity? Reverse dependency edges with impact analysis (direct count, transitive count, impact score in [0,1])."
    )]
    async fn get_dependents(
        &self,
        Parameters(params): Parameters<crate::tools::GetDependentsParams>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .query
            .get_dependents(
                &params.entity,
                params.repository.as_deref(),
                params.depth.unwrap_or(1),
                params.include_cross_repo.unwrap_or(false),
            )
            .await
        {
            Ok(result) => json_text(&result),
            Err(e) => Ok(error_text(e)),
        }
    }

    #[tool(
        name = "get_path",
        description = "Shortest relationship path between two graph nodes, bounded by max_hops. Returns {path_exists:false, path:null, hops:0} when none exists."
    )]
    async fn get_path(
        &self,
        Parameters(params): Parameters<crate::tools::GetPathParams>,
    ) -> Result<CallToolResult, McpError> {
        let types = match parse_edge_types(params.relationship_types) {
            Ok(t) => t,
            Err(message) => return Ok(error_text(message)),
        };
        match self
            .query
            .get_path(&params.from, &params.to, params.max_hops.unwrap_or(5), types)
            .await
        {
            Ok(result) => json_text(&result),
            Err(e) => Ok(error_text(e)),
        }
    }

    #[tool(
        name = "get_architecture",
        description = "Hierarchical structure of a repository (packages, modules, files or entities) plus inter-module dependencies and aggregate metrics."
    )]
    async fn get_architecture(
        &self,
        Parameters(params): Parameters<crate::tools::GetArchitectureParams>,
    ) -> Result<CallToolResult, McpError> {
        let detail = match params.detail_level.as_deref() {
            None => DetailLevel::Modules,
            Some(s) => match DetailLevel::parse(s) {
                Some(d) => d,
                None => {
                    return Ok(error_text(format!(
                        "invalid detail_level '{s}' (expected packages, modules, files or entities)"
                    )))
                }
            },
        };
        match self
            .query
            .get_architecture(
                &params.repository,
                params.scope.as_deref(),
                detail,
                params.include_external.unwrap_or(true),
            )
            .await
        {
            Ok(result) => json_text(&result),
            Err(e) => Ok(error_text(e)),
        }
    }

    #[tool(
        name = "get_graph_metrics",
        description = "Node and relationship counts by label/type for one repository."
    )]
    async fn get_graph_metrics(
        &self,
        Parameters(params): Parameters<crate::tools::GetGraphMetricsParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.query.get_graph_metrics(&params.repository).await {
            Ok(result) => json_text(&result),
            Err(e) => Ok(error_text(e)),
        }
    }

    #[tool(
        name = "index_repository",
        description = "Clone and index a repository into the vector store and the code graph. Long-running; returns the full ingest result."
    )]
    async fn index_repository(
        &self,
        Parameters(params): Parameters<crate::tools::IndexRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let options = IndexOptions {
            name: params.name,
            branch: params.branch,
            force: params.force.unwrap_or(false),
            on_progress: None,
        };
        match self.ingestion.index_repository(&params.url, options).await {
            Ok(outcome) => {
                self.query.invalidate_cache();
                json_text(&outcome)
            }
            Err(e) => Ok(error_text(e)),
        }
    }

    #[tool(
        name = "update_repository",
        description = "Start an asynchronous incremental update (or a forced full re-index). Returns a job_id; poll get_update_status for the result."
    )]
    async fn update_repository(
        &self,
        Parameters(params): Parameters<crate::tools::UpdateRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let name = params.name.clone();
        let job_id = match self.jobs.create(&name) {
            Ok(id) => id,
            Err(e) => return Ok(error_text(e)),
        };

        let jobs = Arc::clone(&self.jobs);
        let updater = Arc::clone(&self.updater);
        let query = Arc::clone(&self.query);
        let force = params.force.unwrap_or(false);
        let spawned_job = job_id.clone();
        tokio::spawn(async move {
            jobs.mark_running(&spawned_job);
            let result = if force {
                updater
                    .force_update(&name)
                    .await
                    .and_then(|o| serde_json::to_value(o).map_err(Into::into))
            } else {
                updater
                    .update_repository(&name)
                    .await
                    .and_then(|o| serde_json::to_value(o).map_err(Into::into))
            };
            match result {
                Ok(value) => {
                    query.invalidate_cache();
                    jobs.complete(&spawned_job, value);
                }
                Err(e) => {
                    warn!("update job for '{name}' failed: {e}");
                    jobs.fail(&spawned_job, e.to_string());
                }
            }
        });

        json_text(&serde_json::json!({
            "job_id": job_id,
            "repository": params.name,
            "status": "pending",
        }))
    }

    #[tool(
        name = "get_update_status",
        description = "Status and result of an asynchronous update job."
    )]
    async fn get_update_status(
        &self,
        Parameters(params): Parameters<crate::tools::GetUpdateStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.jobs.get(&params.job_id) {
            Some(record) => json_text(&record),
            None => Ok(error_text(format!("job not found: {}", params.job_id))),
        }
    }

    #[tool(
        name = "list_repositories",
        description = "All indexed repositories with status, branch, last indexed commit and counters."
    )]
    async fn list_repositories(
        &self,
        Parameters(_params): Parameters<crate::tools::ListRepositoriesParams>,
    ) -> Result<CallToolResult, McpError> {
        let records: Vec<serde_json::Value> = {
            let catalog = self.ingestion.catalog().lock();
            catalog
                .list()
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "name": r.name,
                        "url": r.url,
                        "branch": r.branch,
                        "status": r.status,
                        "last_indexed_commit": r.last_indexed_commit,
                        "file_count": r.file_count,
                        "chunk_count": r.chunk_count,
                        "updated_at": r.updated_at,
                    })
                })
                .collect()
        };
        json_text(&serde_json::json!({ "repositories": records }))
    }

    #[tool(
        name = "remove_repository",
        description = "Delete a repository from the catalog, the vector store and the graph. Irreversible."
    )]
    async fn remove_repository(
        &self,
        Parameters(params): Parameters<crate::tools::RemoveRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.ingestion.remove_repository(&params.name).await {
            Ok(()) => {
                self.query.invalidate_cache();
                info!("repository '{}' removed via MCP", params.name);
                json_text(&serde_json::json!({
                    "removed": params.name,
                }))
            }
            Err(e) => Ok(error_text(e)),
        }
    }
}

#[tool_handler]
impl rmcp::ServerHandler for CodescopeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "codescope: semantic search and a code knowledge graph over your repositories.\n\n\
                 TOOLS:\n\
                 - semantic_search: Find code by meaning (start here)\n\
                 - get_dependencies / get_dependents: Forward and reverse dependency edges\n\
                 - get_path: Shortest relationship path between two nodes\n\
                 - get_architecture: Module/file structure with inter-module dependencies\n\
                 - get_graph_metrics: Node/edge counts for a repository\n\
                 - index_repository / update_repository / get_update_status: Lifecycle\n\
                 - list_repositories / remove_repository: Catalog administration\n\n\
                 NODE IDs: '{Kind}:{repo}:{path}[:name[:line]]' \
                 (e.g. 'Function:my-repo:src/auth.ts:login:42').\n\
                 WORKFLOW: semantic_search → get_dependencies/get_dependents → get_path"
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_type_parsing_rejects_unknown() {
        assert!(parse_edge_types(Some(vec!["CALLS".into(), "IMPORTS".into()])).is_ok());
        let err = parse_edge_types(Some(vec!["BOGUS".into()])).unwrap_err();
        assert!(err.contains("BOGUS"));
        assert!(parse_edge_types(None).unwrap().is_none());
    }

    #[test]
    fn json_text_pretty_prints() {
        let result = json_text(&serde_json::json!({"a": 1})).unwrap();
        assert_ne!(result.is_error, Some(true));
    }

    #[test]
    fn error_text_sets_is_error() {
        let result = error_text("boom");
        assert_eq!(result.is_error, Some(true));
    }
}
