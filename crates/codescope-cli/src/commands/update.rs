//! Update command
//!
//! Applies upstream changes since the last indexed commit; `--force` runs a
//! full re-index instead.

use anyhow::{bail, Result};
use clap::Args;

use codescope_index::UpdateStatus;

use crate::commands::{build_context, print_errors};
use crate::progress::StatusLine;
use crate::GlobalOptions;

/// Update an indexed repository incrementally
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Repository name
    name: String,

    /// Force a full re-index instead of an incremental update
    #[arg(long)]
    force: bool,

    /// Print a single JSON object instead of progress output
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: UpdateArgs, global: GlobalOptions) -> Result<()> {
    let ctx = build_context(&global).await?;
    let quiet = global.quiet || args.json;

    if args.force {
        let status = StatusLine::start(format!("Re-indexing '{}'...", args.name), quiet);
        let outcome = ctx.updater.force_update(&args.name).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        } else {
            status.done(format!(
                "Re-indexed '{}': {} files, {} chunks",
                outcome.repository,
                outcome.stats.files_processed,
                outcome.stats.chunks_created
            ));
            print_errors(&outcome.errors);
        }
        return Ok(());
    }

    let status = StatusLine::start(format!("Updating '{}'...", args.name), quiet);
    let outcome = match ctx.updater.update_repository(&args.name).await {
        Ok(outcome) => outcome,
        Err(e) => {
            status.fail("Update failed");
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
        match outcome.status {
            UpdateStatus::NoChanges => status.done(format!(
                "'{}' is up to date at {:.8}",
                outcome.repository, outcome.commit_sha
            )),
            UpdateStatus::Updated | UpdateStatus::UpdatedWithErrors => {
                status.done(format!(
                    "Updated '{}' to {:.8}: +{} ~{} -{} files, {} chunks upserted, {} deleted ({}ms)",
                    outcome.repository,
                    outcome.commit_sha,
                    outcome.stats.files_added,
                    outcome.stats.files_modified,
                    outcome.stats.files_deleted,
                    outcome.stats.chunks_upserted,
                    outcome.stats.chunks_deleted,
                    outcome.stats.duration_ms,
                ));
                print_errors(&outcome.errors);
            }
            UpdateStatus::Failed => {
                status.fail("Update failed");
                print_errors(&outcome.errors);
            }
        }
    }

    if outcome.status == UpdateStatus::Failed {
        bail!("update failed for '{}'", outcome.repository);
    }
    Ok(())
}
