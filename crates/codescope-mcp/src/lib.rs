//! codescope-mcp - MCP server exposing search and graph tools
//!
//! - [`server`] — the tool adapter over the search, graph-query, ingestion
//!   and update services
//! - [`session`] — streaming transport session registry (TTL + cap)
//! - [`jobs`] — async update job tracker
//! - [`http`] — streamable HTTP transport binding at `/mcp`
//!
//! Transports: stdio (`server.serve(rmcp::transport::stdio())`) and
//! streamable HTTP ([`http::serve_http`]).

pub mod error;
pub mod http;
pub mod jobs;
pub mod server;
pub mod session;
pub mod tools;

// Re-exports
pub use error::{Result, ServeError};
pub use http::{build_router, serve_http};
pub use jobs::{JobRecord, JobStatus, JobTracker};
pub use server::CodescopeServer;
pub use session::{SessionHandle, SessionManager, MAX_SESSIONS, SESSION_TTL_MS};
