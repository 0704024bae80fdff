//! CLI command implementations

pub mod graph;
pub mod index;
pub mod remove;
pub mod search;
pub mod serve;
pub mod status;
pub mod update;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use codescope_config::{CodescopeConfig, ConfigLoader, ConfigOverrides};
use codescope_core::{ChunkConfig, ScanConfig};
use codescope_graph::{
    GraphClient, GraphIngestionService, GraphQueryService, GraphStoreConfig,
};
use codescope_index::{
    IngestionConfig, IngestionService, RepoLocks, RepositoryCatalog, UpdateCoordinator,
};
use codescope_search::{
    create_provider, BatchedEmbedder, EmbeddingSettings, SemanticSearch, VectorStore,
    VectorStoreConfig,
};

use crate::GlobalOptions;

/// Per-file error rendering: first five, then a summary line.
pub fn print_errors(errors: &[codescope_index::FileError]) {
    for err in errors.iter().take(5) {
        eprintln!("  {}: {}", err.path, err.error);
    }
    if errors.len() > 5 {
        eprintln!("  …and {} more", errors.len() - 5);
    }
}

/// All connected services behind one handle.
pub struct AppContext {
    pub config: CodescopeConfig,
    pub store: Arc<VectorStore>,
    pub embedder: BatchedEmbedder,
    pub graph_client: Arc<GraphClient>,
    pub graph_ingest: Arc<GraphIngestionService>,
    pub query: Arc<GraphQueryService>,
    pub search: Arc<SemanticSearch>,
    pub ingestion: Arc<IngestionService>,
    pub updater: Arc<UpdateCoordinator>,
}

/// Load configuration for the current invocation.
pub fn load_config(global: &GlobalOptions) -> Result<CodescopeConfig> {
    let overrides = ConfigOverrides {
        data_path: global.data_path.clone(),
        vector_url: global.qdrant_url.clone(),
        graph_host: global.neo4j_host.clone(),
        embedding_provider: global.provider,
        embedding_model: None,
    };
    let loader = ConfigLoader::new();
    let config = match &global.config {
        Some(path) => loader.load_file(path, &overrides),
        None => {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            loader.load(&cwd, &overrides)
        }
    }
    .context("failed to load configuration")?;
    Ok(config)
}

/// Connect both stores and assemble the service graph.
pub async fn build_context(global: &GlobalOptions) -> Result<AppContext> {
    let config = load_config(global)?;

    let store = Arc::new(
        VectorStore::connect(VectorStoreConfig {
            url: config.vector.url.clone(),
            api_key: config.vector.api_key.clone(),
            timeout_secs: config.vector.timeout_secs,
        })
        .await
        .context("failed to connect to the vector store")?,
    );

    let graph_client = Arc::new(
        GraphClient::connect(GraphStoreConfig {
            host: config.graph.host.clone(),
            port: config.graph.port,
            username: config.graph.username.clone(),
            password: config.graph.password.clone(),
        })
        .await
        .context("failed to connect to the graph store")?,
    );

    let settings = EmbeddingSettings {
        provider: config.embedding.provider.as_str().to_string(),
        model: config.embedding.model.clone(),
        dimensions: config.embedding.dimensions,
        batch_size: config.embedding.batch_size,
        max_retries: config.embedding.max_retries,
        timeout_ms: config.embedding.timeout_ms,
        api_key: config.embedding.resolve_api_key(),
        base_url: config.embedding.base_url.clone(),
        keep_alive: config.embedding.keep_alive.clone(),
        model_path: config.embedding.model_path.clone(),
    };
    let provider = create_provider(&settings).context("failed to create embedding provider")?;
    let mut embedder = BatchedEmbedder::new(provider);
    if let Some(retries) = config.embedding.max_retries {
        embedder = embedder.with_max_retries(retries);
    }

    let mut scan = ScanConfig::default();
    if !config.scanner.include_extensions.is_empty() {
        scan.include_extensions = config.scanner.include_extensions.clone();
    }
    scan.exclude_patterns
        .extend(config.scanner.exclude_patterns.iter().cloned());
    scan.max_file_size_bytes = config.scanner.max_file_size_bytes;

    let chunk = ChunkConfig {
        max_chars: config.chunking.max_chars,
        overlap_lines: config.chunking.overlap_lines,
        ..Default::default()
    };

    let catalog = Arc::new(Mutex::new(
        RepositoryCatalog::load(&config.storage.data_path)
            .context("failed to load repository catalog")?,
    ));

    let graph_ingest = Arc::new(GraphIngestionService::new(Arc::clone(&graph_client)));
    let query = Arc::new(GraphQueryService::new(Arc::clone(&graph_client)));
    let search = Arc::new(SemanticSearch::new(Arc::clone(&store), embedder.clone()));

    let locks = RepoLocks::new();
    let ingestion = Arc::new(IngestionService::new(
        IngestionConfig {
            data_path: config.storage.data_path.clone(),
            scan,
            chunk: chunk.clone(),
            workers: 8,
        },
        Arc::clone(&catalog),
        Arc::clone(&store),
        embedder.clone(),
        Arc::clone(&graph_ingest),
        locks.clone(),
    ));
    let updater = Arc::new(UpdateCoordinator::new(
        catalog,
        Arc::clone(&store),
        embedder.clone(),
        Arc::clone(&graph_ingest),
        Arc::clone(&ingestion),
        locks,
        chunk,
    ));

    Ok(AppContext {
        config,
        store,
        embedder,
        graph_client,
        graph_ingest,
        query,
        search,
        ingestion,
        updater,
    })
}
