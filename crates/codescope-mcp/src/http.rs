//! Streamable HTTP transport at `/mcp`.
//!
//! `POST` carries JSON-RPC messages, `GET` opens the server-push stream,
//! `DELETE` ends a session. The wire framing is rmcp's
//! [`StreamableHttpService`]; the session guard in front of it enforces the
//! session contract: every non-initialize request must carry
//! `Mcp-Session-Id` (400 "session required" otherwise), new sessions are
//! capped, and idle sessions are swept by the [`SessionManager`].
//!
//! Errors here are emitted before the response stream begins, so a JSON-RPC
//! error body is always safe; once rmcp has started streaming, failures are
//! logged and dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::error::{Result, ServeError};
use crate::server::CodescopeServer;
use crate::session::{NullHandle, SessionManager};

/// Session id header exchanged with clients.
const SESSION_HEADER: &str = "mcp-session-id";

/// Largest buffered POST body.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
struct GuardState {
    sessions: Arc<SessionManager>,
}

/// Build the `/mcp` router over a server instance.
pub fn build_router(server: CodescopeServer) -> Router {
    let sessions = Arc::clone(server.sessions());
    let service: StreamableHttpService<CodescopeServer, LocalSessionManager> =
        StreamableHttpService::new(
            move || Ok(server.clone()),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig::default(),
        );

    Router::new()
        .nest_service("/mcp", service)
        .layer(middleware::from_fn_with_state(
            GuardState { sessions },
            session_guard,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Serve the streamable HTTP transport until the listener fails.
pub async fn serve_http(server: CodescopeServer, addr: SocketAddr) -> Result<()> {
    let router = build_router(server);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("MCP streamable HTTP listening on http://{addr}/mcp");
    axum::serve(listener, router)
        .await
        .map_err(|e| ServeError::Transport(e.to_string()))
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// 400 "session required" as a JSON-RPC error body.
fn session_required() -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "error": { "code": -32000, "message": "session required" },
        "id": null,
    });
    (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
}

fn too_many_sessions(limit: usize) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "error": { "code": -32000, "message": format!("TOO_MANY_SESSIONS: limit {limit} reached") },
        "id": null,
    });
    (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response()
}

/// Enforce the session contract in front of the rmcp wire layer.
async fn session_guard(
    State(state): State<GuardState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let existing = session_id(request.headers());

    match (&method, &existing) {
        // Known session: record activity and pass through.
        (_, Some(id)) => {
            state.sessions.touch(id);
            let response = next.run(request).await;
            if method == Method::DELETE {
                if state.sessions.remove(id).await.is_ok() {
                    debug!("session {id} ended by client");
                }
            }
            response
        }
        // Sessionless GET/DELETE can never be valid.
        (&Method::GET, None) | (&Method::DELETE, None) => session_required(),
        // Sessionless POST is only allowed for initialize.
        (&Method::POST, None) => {
            let (parts, body) = request.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                Ok(b) => b,
                Err(_) => return session_required(),
            };
            if !is_initialize(&bytes) {
                return session_required();
            }

            let response = next
                .run(Request::from_parts(parts, Body::from(bytes)))
                .await;

            // The wire layer minted a session id; mirror it in the registry.
            if let Some(new_id) = session_id(response.headers()) {
                match state.sessions.register(&new_id, Arc::new(NullHandle)) {
                    Ok(()) => debug!("session {new_id} established"),
                    Err(ServeError::TooManySessions(limit)) => {
                        return too_many_sessions(limit);
                    }
                    Err(_) => {}
                }
            }
            response
        }
        _ => next.run(request).await,
    }
}

/// Whether a JSON-RPC body is an `initialize` request.
fn is_initialize(body: &[u8]) -> bool {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return false;
    };
    value
        .get("method")
        .and_then(|m| m.as_str())
        .map(|m| m == "initialize")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_detection() {
        assert!(is_initialize(br#"{"jsonrpc":"2.0","method":"initialize","id":1}"#));
        assert!(!is_initialize(br#"{"jsonrpc":"2.0","method":"tools/list","id":2}"#));
        assert!(!is_initialize(b"not json"));
    }

    #[test]
    fn session_header_extraction() {
        let mut headers = HeaderMap::new();
        assert!(session_id(&headers).is_none());
        headers.insert(SESSION_HEADER, "abc-123".parse().unwrap());
        assert_eq!(session_id(&headers).as_deref(), Some("abc-123"));
    }
}
