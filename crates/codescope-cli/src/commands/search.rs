//! Search command
//!
//! Semantic search over the indexed repositories from the terminal.

use anyhow::Result;
use clap::Args;

use codescope_search::SearchRequest;

use crate::commands::build_context;
use crate::GlobalOptions;

/// Search indexed repositories semantically
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text
    query: String,

    /// Restrict to specific repositories (default: all)
    #[arg(long, short = 'r')]
    repo: Vec<String>,

    /// Maximum results (1-50)
    #[arg(long, default_value_t = 10)]
    limit: usize,

    /// Minimum similarity threshold (0.0-1.0)
    #[arg(long, default_value_t = 0.0)]
    threshold: f32,

    /// Restrict to one file extension
    #[arg(long)]
    extension: Option<String>,

    /// Print a single JSON object
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: SearchArgs, global: GlobalOptions) -> Result<()> {
    let ctx = build_context(&global).await?;

    let repositories = if args.repo.is_empty() {
        let catalog = ctx.ingestion.catalog().lock();
        catalog.list().iter().map(|r| r.name.clone()).collect()
    } else {
        args.repo.clone()
    };

    let response = ctx
        .search
        .search(SearchRequest {
            query: args.query,
            repositories,
            limit: args.limit,
            threshold: args.threshold,
            file_extension: args.extension,
        })
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!(
            "No matches across {} repositories ({}ms).",
            response.metadata.repositories_searched.len(),
            response.metadata.query_time_ms
        );
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. {}:{} (lines {}-{}, score {:.3})",
            i + 1,
            result.repository,
            result.file_path,
            result.start_line,
            result.end_line,
            result.similarity
        );
        for line in result.snippet.lines().take(6) {
            println!("     {line}");
        }
        println!();
    }
    println!(
        "{} matches in {}ms",
        response.metadata.total_matches, response.metadata.query_time_ms
    );
    Ok(())
}
