//! codescope CLI - personal knowledge server over your repositories
//!
//! Indexes git repositories into a Qdrant vector store and a Neo4j code
//! graph, and serves semantic search plus graph queries over MCP.
//!
//! # Usage
//!
//! ```bash
//! # Index a repository
//! codescope index https://github.com/acme/widget.git
//!
//! # Pull upstream changes incrementally
//! codescope update widget
//!
//! # Search from the terminal
//! codescope search "retry with exponential backoff"
//!
//! # Serve MCP over stdio
//! codescope serve mcp
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;
mod progress;

/// codescope - semantic search and code graph for your repositories
#[derive(Parser, Debug)]
#[command(name = "codescope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Path to configuration file
    #[arg(long, short = 'c', global = true, env = "CODESCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (working trees and catalog)
    #[arg(long, global = true, env = "CODESCOPE_DATA_PATH")]
    data_path: Option<PathBuf>,

    /// Qdrant server URL
    #[arg(long, global = true, env = "CODESCOPE_QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Neo4j host
    #[arg(long, global = true, env = "CODESCOPE_NEO4J_HOST")]
    neo4j_host: Option<String>,

    /// Embedding provider (openai, local, ollama)
    #[arg(long, global = true, env = "CODESCOPE_EMBEDDING_PROVIDER", value_parser = parse_provider)]
    provider: Option<codescope_config::EmbeddingProviderKind>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

fn parse_provider(s: &str) -> Result<codescope_config::EmbeddingProviderKind, String> {
    s.parse()
        .map_err(|e: codescope_config::ConfigError| e.to_string())
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clone and index a repository into both stores
    Index(commands::index::IndexArgs),

    /// Apply upstream changes incrementally
    Update(commands::update::UpdateArgs),

    /// Show the repository catalog and store health
    Status(commands::status::StatusArgs),

    /// Search indexed repositories semantically
    Search(commands::search::SearchArgs),

    /// Graph queries and graph-only population
    Graph(commands::graph::GraphArgs),

    /// Remove a repository from catalog and both stores
    Remove(commands::remove::RemoveArgs),

    /// Watch a repository's working tree and reingest changes
    Watch(commands::watch::WatchArgs),

    /// Run the MCP server (stdio or streamable HTTP)
    #[command(subcommand)]
    Serve(commands::serve::ServeCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging goes to stderr; stdout is reserved for command output (and for
    // the MCP protocol under `serve mcp`).
    let level = if cli.global.verbose {
        Level::DEBUG
    } else if cli.global.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing_subscriber::util::SubscriberInitExt::try_init(subscriber);

    match cli.command {
        Commands::Index(args) => commands::index::execute(args, cli.global).await,
        Commands::Update(args) => commands::update::execute(args, cli.global).await,
        Commands::Status(args) => commands::status::execute(args, cli.global).await,
        Commands::Search(args) => commands::search::execute(args, cli.global).await,
        Commands::Graph(args) => commands::graph::execute(args, cli.global).await,
        Commands::Remove(args) => commands::remove::execute(args, cli.global).await,
        Commands::Watch(args) => commands::watch::execute(args, cli.global).await,
        Commands::Serve(command) => commands::serve::execute(command, cli.global).await,
    }
}
