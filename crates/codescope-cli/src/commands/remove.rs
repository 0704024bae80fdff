//! Remove command
//!
//! Deletes a repository from the catalog, the vector store and the graph.

use anyhow::Result;
use clap::Args;

use crate::commands::build_context;
use crate::progress::StatusLine;
use crate::GlobalOptions;

/// Remove a repository from the catalog and both stores
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Repository name
    name: String,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,
}

pub async fn execute(args: RemoveArgs, global: GlobalOptions) -> Result<()> {
    if !args.yes {
        eprint!(
            "Remove '{}' from the catalog, vector store and graph? [y/N] ",
            args.name
        );
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            eprintln!("Aborted.");
            return Ok(());
        }
    }

    let ctx = build_context(&global).await?;
    let status = StatusLine::start(format!("Removing '{}'...", args.name), global.quiet);
    match ctx.ingestion.remove_repository(&args.name).await {
        Ok(()) => {
            status.done(format!("Removed '{}'", args.name));
            Ok(())
        }
        Err(e) => {
            status.fail(format!("Could not remove '{}'", args.name));
            Err(e.into())
        }
    }
}
