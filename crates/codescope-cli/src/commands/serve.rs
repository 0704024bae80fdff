//! Serve command
//!
//! Runs the MCP server over stdio or streamable HTTP.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use rmcp::{transport::stdio, ServiceExt};
use tracing::info;

use codescope_mcp::{serve_http, CodescopeServer};

use crate::commands::build_context;
use crate::GlobalOptions;

/// Run the MCP server
#[derive(Subcommand, Debug)]
pub enum ServeCommand {
    /// MCP over stdio (for editor/agent integration)
    Mcp(McpArgs),

    /// MCP over streamable HTTP at /mcp
    Http(HttpArgs),
}

#[derive(Args, Debug)]
pub struct McpArgs {}

#[derive(Args, Debug)]
pub struct HttpArgs {
    /// Bind address (default from config, e.g. 127.0.0.1:8321)
    #[arg(long)]
    addr: Option<String>,
}

pub async fn execute(command: ServeCommand, global: GlobalOptions) -> Result<()> {
    let ctx = build_context(&global).await?;
    let server = CodescopeServer::new(
        ctx.search.clone(),
        ctx.query.clone(),
        ctx.ingestion.clone(),
        ctx.updater.clone(),
    );

    match command {
        ServeCommand::Mcp(_) => {
            info!("starting MCP protocol over stdio");
            let service = server
                .serve(stdio())
                .await
                .context("failed to start MCP service")?;

            tokio::select! {
                result = service.waiting() => {
                    if let Err(e) = result {
                        info!("service ended with error: {e}");
                    } else {
                        info!("service ended normally");
                    }
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received");
                }
            }
        }
        ServeCommand::Http(args) => {
            let addr = args
                .addr
                .unwrap_or_else(|| ctx.config.server.http_addr.clone())
                .parse()
                .context("invalid bind address")?;
            tokio::select! {
                result = serve_http(server, addr) => {
                    result.context("HTTP transport failed")?;
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received");
                }
            }
        }
    }

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
