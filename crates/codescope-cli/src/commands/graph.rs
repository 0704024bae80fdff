//! Graph commands
//!
//! Graph-only population plus dependency/path/metrics queries from the
//! terminal.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use codescope_core::model::EdgeType;
use codescope_graph::{DetailLevel, FileInput, IngestOptions};
use codescope_core::{ScanConfig, Scanner};

use crate::commands::build_context;
use crate::progress::StatusLine;
use crate::GlobalOptions;

/// Graph queries and graph-only population
#[derive(Args, Debug)]
pub struct GraphArgs {
    #[command(subcommand)]
    command: GraphCommand,
}

#[derive(Subcommand, Debug)]
enum GraphCommand {
    /// Rebuild the code graph for a repository (vectors untouched)
    Populate {
        /// Repository name
        name: String,
    },

    /// Forward dependencies of an entity
    Deps {
        /// Entity reference (node id, name, or file path)
        entity: String,
        /// Repository name
        #[arg(long, short = 'r')]
        repo: String,
        /// Traversal depth (1-5)
        #[arg(long, default_value_t = 1)]
        depth: u32,
        /// Relationship whitelist (e.g. IMPORTS,CALLS)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
    },

    /// Reverse dependents of an entity with impact analysis
    Dependents {
        entity: String,
        #[arg(long, short = 'r')]
        repo: String,
        #[arg(long, default_value_t = 1)]
        depth: u32,
    },

    /// Shortest path between two node ids
    Path {
        from: String,
        to: String,
        #[arg(long, default_value_t = 5)]
        max_hops: u32,
    },

    /// Architecture overview of a repository
    Architecture {
        name: String,
        /// packages | modules | files | entities
        #[arg(long, default_value = "modules")]
        detail: String,
    },

    /// A node and its immediate neighborhood in both directions
    Context {
        /// Full node id (e.g. "Function:repo:src/a.ts:main:3")
        node_id: String,
    },

    /// Node and relationship counts
    Metrics {
        name: String,
    },
}

pub async fn execute(args: GraphArgs, global: GlobalOptions) -> Result<()> {
    let ctx = build_context(&global).await?;

    match args.command {
        GraphCommand::Populate { name } => {
            let (workdir, url) = {
                let catalog = ctx.ingestion.catalog().lock();
                let record = catalog
                    .get(&name)
                    .with_context(|| format!("repository '{name}' is not indexed"))?;
                (record.local_path.clone(), record.url.clone())
            };

            let status = StatusLine::start(format!("Populating graph for '{name}'..."), global.quiet);
            let scanner = Scanner::new(ScanConfig::default())?;
            let files = scanner.scan(&workdir, None)?;
            let mut inputs = Vec::with_capacity(files.len());
            for file in files {
                let content = std::fs::read_to_string(&file.absolute_path)
                    .unwrap_or_default();
                inputs.push(FileInput {
                    path: file.relative_path,
                    content,
                    hash: None,
                    chunks: Vec::new(),
                });
            }

            let outcome = ctx
                .graph_ingest
                .ingest(
                    inputs,
                    IngestOptions {
                        repository: name.clone(),
                        repository_url: url,
                        force: true,
                    },
                )
                .await?;
            ctx.query.invalidate_cache();
            status.done(format!(
                "Graph for '{name}': {} files, {} entities, {} relationships ({}ms)",
                outcome.stats.files_processed,
                outcome.stats.entities_created,
                outcome.stats.relationships_created,
                outcome.stats.duration_ms
            ));
        }
        GraphCommand::Deps {
            entity,
            repo,
            depth,
            types,
        } => {
            let whitelist = parse_types(&types)?;
            let result = ctx
                .query
                .get_dependencies(&entity, &repo, depth, whitelist)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        GraphCommand::Dependents {
            entity,
            repo,
            depth,
        } => {
            let result = ctx
                .query
                .get_dependents(&entity, Some(&repo), depth, false)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        GraphCommand::Path { from, to, max_hops } => {
            let result = ctx.query.get_path(&from, &to, max_hops, None).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        GraphCommand::Architecture { name, detail } => {
            let level = DetailLevel::parse(&detail)
                .with_context(|| format!("invalid detail level '{detail}'"))?;
            let result = ctx
                .query
                .get_architecture(&name, None, level, true)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        GraphCommand::Context { node_id } => {
            let result = ctx.graph_client.get_context(&node_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        GraphCommand::Metrics { name } => {
            let result = ctx.query.get_graph_metrics(&name).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

fn parse_types(names: &[String]) -> Result<Option<Vec<EdgeType>>> {
    if names.is_empty() {
        return Ok(None);
    }
    let mut types = Vec::with_capacity(names.len());
    for name in names {
        let parsed = EdgeType::parse(name)
            .with_context(|| format!("unknown relationship type '{name}'"))?;
        types.push(parsed);
    }
    Ok(Some(types))
}
