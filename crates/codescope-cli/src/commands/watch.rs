//! Watch command
//!
//! Watches an indexed repository's working tree and reingests changed files
//! as they settle (debounced). Useful while editing a locally indexed tree
//! without going through upstream commits.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use codescope_index::{FolderWatcher, WatchedFolder};

use crate::commands::build_context;
use crate::GlobalOptions;

/// Watch a repository's working tree and reingest changes
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Repository name
    name: String,

    /// Debounce window in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Include patterns (globs on basename or relative path)
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Exclude patterns
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,
}

pub async fn execute(args: WatchArgs, global: GlobalOptions) -> Result<()> {
    let ctx = build_context(&global).await?;

    let workdir = {
        let catalog = ctx.ingestion.catalog().lock();
        catalog
            .get(&args.name)
            .map(|r| r.local_path.clone())
            .with_context(|| format!("repository '{}' is not indexed", args.name))?
    };

    let watcher = FolderWatcher::with_max_watchers(ctx.config.watcher.max_concurrent_watchers);
    let updater = Arc::clone(&ctx.updater);
    let repo = args.name.clone();
    let root = workdir.clone();
    let handle = tokio::runtime::Handle::current();

    watcher.on_file_event(Arc::new(move |event| {
        let Ok(relative) = event.path.strip_prefix(&root) else {
            return;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        let updater = Arc::clone(&updater);
        let repo = repo.clone();
        handle.spawn(async move {
            match updater.reingest_path(&repo, &relative).await {
                Ok(chunks) => info!("reingested {repo}:{relative} ({chunks} chunks)"),
                Err(e) => warn!("reingest of {repo}:{relative} failed: {e}"),
            }
        });
    }));
    watcher.on_error(Arc::new(|message| {
        warn!("watcher error: {message}");
    }));

    watcher.start_watching(WatchedFolder {
        id: args.name.clone(),
        path: workdir.clone(),
        include_patterns: args.include,
        exclude_patterns: args.exclude,
        debounce_ms: args.debounce_ms.or(Some(ctx.config.watcher.debounce_ms)),
    })?;

    info!(
        "watching '{}' at {} (ctrl-c to stop)",
        args.name,
        workdir.display()
    );
    let _ = tokio::signal::ctrl_c().await;
    watcher.shutdown();
    Ok(())
}
