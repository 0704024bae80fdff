//! Index command
//!
//! Clones a repository and indexes it into the vector store and the code
//! graph.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;

use codescope_index::{IndexOptions, OpStatus};

use crate::commands::{build_context, print_errors};
use crate::progress::StatusLine;
use crate::GlobalOptions;

/// Index a repository from its URL
#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Repository clone URL (https or ssh)
    url: String,

    /// Name for the repository (default: derived from the URL)
    #[arg(long)]
    name: Option<String>,

    /// Branch to index (default: the clone's default branch)
    #[arg(long)]
    branch: Option<String>,

    /// Replace an already-indexed repository
    #[arg(long)]
    force: bool,

    /// Print a single JSON object instead of progress output
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: IndexArgs, global: GlobalOptions) -> Result<()> {
    let ctx = build_context(&global).await?;
    let quiet = global.quiet || args.json;

    let status = StatusLine::start("Indexing...", quiet);
    let progress_line = status.clone();
    let on_progress = Some(Arc::new(move |phase, details: &str| {
        progress_line.update(format!("{}: {details}", phase_label(phase)));
    }) as codescope_index::ProgressFn);

    let options = IndexOptions {
        name: args.name,
        branch: args.branch,
        force: args.force,
        on_progress: if quiet { None } else { on_progress },
    };

    let outcome = match ctx.ingestion.index_repository(&args.url, options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            status.fail("Indexing failed");
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({ "status": "failed", "error": e.to_string() })
                );
            }
            return Err(e.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        let summary = format!(
            "Indexed '{}' at {:.8}: {} files, {} chunks, {} documents in {}ms",
            outcome.repository,
            outcome.commit_sha,
            outcome.stats.files_processed,
            outcome.stats.chunks_created,
            outcome.stats.documents_stored,
            outcome.stats.duration_ms,
        );
        match outcome.status {
            OpStatus::Success => status.done(summary),
            OpStatus::Partial => {
                status.done(format!("{summary} (partial)"));
                print_errors(&outcome.errors);
            }
            OpStatus::Failed => {
                status.fail(summary);
                print_errors(&outcome.errors);
            }
        }
    }

    if outcome.status == OpStatus::Failed {
        bail!("indexing failed for '{}'", outcome.repository);
    }
    Ok(())
}

fn phase_label(phase: codescope_index::IndexPhase) -> &'static str {
    use codescope_index::IndexPhase;
    match phase {
        IndexPhase::Cloning => "Cloning",
        IndexPhase::Scanning => "Scanning",
        IndexPhase::Chunking => "Chunking",
        IndexPhase::Embedding => "Embedding",
        IndexPhase::Storing => "Storing",
        IndexPhase::GraphIngesting => "Graph ingest",
        IndexPhase::Finalizing => "Finalizing",
    }
}
