//! Status command
//!
//! Shows the repository catalog plus store health.

use anyhow::Result;
use clap::Args;

use crate::commands::build_context;
use crate::GlobalOptions;

/// Show indexed repositories and store health
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print a single JSON object
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: StatusArgs, global: GlobalOptions) -> Result<()> {
    let ctx = build_context(&global).await?;

    let vector_healthy = ctx.store.health_check().await.unwrap_or(false);
    let graph_healthy = ctx.graph_client.health_check().await.unwrap_or(false);

    let records: Vec<serde_json::Value> = {
        let catalog = ctx.ingestion.catalog().lock();
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

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "vector_store_healthy": vector_healthy,
                "graph_store_healthy": graph_healthy,
                "repositories": records,
            }))?
        );
        return Ok(());
    }

    println!(
        "Vector store: {}",
        if vector_healthy { "healthy" } else { "unreachable" }
    );
    println!(
        "Graph store:  {}",
        if graph_healthy { "healthy" } else { "unreachable" }
    );
    println!();

    if records.is_empty() {
        println!("No repositories indexed. Run `codescope index <url>` to start.");
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:<10} {:>8} {:>8}  {}",
        "NAME", "STATUS", "COMMIT", "FILES", "CHUNKS", "BRANCH"
    );
    for r in &records {
        let commit = r["last_indexed_commit"]
            .as_str()
            .map(|s| s.chars().take(8).collect::<String>())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<24} {:<10} {:<10} {:>8} {:>8}  {}",
            r["name"].as_str().unwrap_or("-"),
            r["status"].as_str().unwrap_or("-"),
            commit,
            r["file_count"],
            r["chunk_count"],
            r["branch"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}
