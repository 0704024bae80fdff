//! Qdrant vector store client.
//!
//! One collection per repository (`repo_{name}`). Upserts are idempotent by
//! document id: point ids are UUIDv5 hashes of `{repo}:{path}:{chunk_index}`,
//! so re-ingesting identical content rewrites the same points.

use qdrant_client::qdrant::{
    vectors_config::Config, Condition, CountPointsBuilder, CreateCollectionBuilder,
    CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance, FieldType, Filter,
    MinShould, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, VectorParams, VectorsConfig,
};
use qdrant_client::{Payload, Qdrant};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SearchError};
use crate::schema::{fields, point_uuid, ChunkDocument, SearchHit};

/// Upsert batch size.
const UPSERT_BATCH_SIZE: usize = 100;

/// Connection configuration for Qdrant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Qdrant server URL (e.g. "http://localhost:6334").
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Optional metadata filter for similarity search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub repository: Option<String>,
    pub file_extension: Option<String>,
    pub file_path: Option<String>,
}

/// Collection statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub points_count: u64,
}

/// Qdrant-backed vector store.
pub struct VectorStore {
    client: Qdrant,
}

impl VectorStore {
    /// Connect and verify reachability.
    pub async fn connect(config: VectorStoreConfig) -> Result<Self> {
        info!("connecting to Qdrant at {}", config.url);

        let mut builder = Qdrant::from_url(&config.url);
        if let Some(api_key) = config.api_key {
            builder = builder.api_key(api_key);
        }
        let client = builder
            .build()
            .map_err(|e| SearchError::Connection(format!("failed to build Qdrant client: {e}")))?;

        client
            .list_collections()
            .await
            .map_err(|e| SearchError::Connection(format!("failed to connect to Qdrant: {e}")))?;

        info!("connected to Qdrant");
        Ok(Self { client })
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.client.collection_exists(name).await?)
    }

    /// Create the collection if missing; always returns its name.
    pub async fn get_or_create_collection(&self, name: &str, dimensions: u64) -> Result<String> {
        if self.collection_exists(name).await? {
            debug!("collection '{name}' already exists");
            return Ok(name.to_string());
        }

        info!("creating collection '{name}' (dim={dimensions}, distance=Cosine)");
        let vectors_config = VectorsConfig {
            config: Some(Config::Params(VectorParams {
                size: dimensions,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })),
        };
        self.client
            .create_collection(CreateCollectionBuilder::new(name).vectors_config(vectors_config))
            .await?;

        // Payload indexes for the filterable fields.
        for field in [fields::REPOSITORY, fields::FILE_PATH, fields::FILE_EXTENSION] {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    name,
                    field,
                    FieldType::Keyword,
                ))
                .await?;
        }

        Ok(name.to_string())
    }

    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        if !self.collection_exists(name).await? {
            return Ok(());
        }
        info!("deleting collection '{name}'");
        self.client.delete_collection(name).await?;
        Ok(())
    }

    /// Idempotent batched upsert.
    pub async fn upsert(&self, collection: &str, docs: Vec<ChunkDocument>) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }
        let total = docs.len();
        debug!("upserting {total} documents into '{collection}'");

        for batch in docs.chunks(UPSERT_BATCH_SIZE) {
            let points: Vec<PointStruct> = batch
                .iter()
                .map(|doc| {
                    let payload = Payload::try_from(doc.payload_json())
                        .map_err(|e| SearchError::Qdrant(format!("payload build failed: {e}")))?;
                    Ok(PointStruct::new(
                        point_uuid(&doc.id).to_string(),
                        doc.vector.clone(),
                        payload,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;

            self.client
                .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
                .await?;
        }

        Ok(total)
    }

    /// Delete documents by string document id.
    pub async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut filter = Filter::default();
        filter.should = ids
            .iter()
            .map(|id| Condition::matches(fields::DOC_ID, id.clone()))
            .collect();
        filter.min_should = Some(MinShould {
            conditions: vec![],
            min_count: 1,
        });

        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(filter)
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    /// Delete every chunk document of one file (the `{repo}:{path}:` id
    /// prefix) from a collection.
    pub async fn delete_by_file_prefix(
        &self,
        collection: &str,
        repo: &str,
        file_path: &str,
    ) -> Result<()> {
        debug!("deleting documents for {repo}:{file_path} from '{collection}'");
        let filter = Filter::must([
            Condition::matches(fields::REPOSITORY, repo.to_string()),
            Condition::matches(fields::FILE_PATH, file_path.to_string()),
        ]);
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(filter)
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    /// Similarity search: up to `k` results, non-increasing similarity, ties
    /// broken by document id ascending; results under `threshold` are
    /// filtered server-side.
    pub async fn similarity_search(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        k: u64,
        threshold: f32,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let mut builder = SearchPointsBuilder::new(collection, query_vector, k)
            .with_payload(true)
            .score_threshold(threshold);

        if let Some(f) = filter {
            let mut conditions = Vec::new();
            if let Some(repo) = f.repository {
                conditions.push(Condition::matches(fields::REPOSITORY, repo));
            }
            if let Some(ext) = f.file_extension {
                conditions.push(Condition::matches(fields::FILE_EXTENSION, ext));
            }
            if let Some(path) = f.file_path {
                conditions.push(Condition::matches(fields::FILE_PATH, path));
            }
            if !conditions.is_empty() {
                builder = builder.filter(Filter::must(conditions));
            }
        }

        let response = self.client.search_points(builder).await?;

        let mut hits: Vec<SearchHit> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                let get_string = |key: &str| -> String {
                    payload
                        .get(key)
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_default()
                };
                let get_u32 = |key: &str| -> u32 {
                    payload
                        .get(key)
                        .and_then(|v| v.as_integer())
                        .map(|i| i as u32)
                        .unwrap_or(0)
                };

                Some(SearchHit {
                    doc_id: get_string(fields::DOC_ID),
                    score: point.score,
                    content: get_string(fields::CONTENT),
                    file_path: get_string(fields::FILE_PATH),
                    repository: get_string(fields::REPOSITORY),
                    chunk_index: get_u32(fields::CHUNK_INDEX),
                    chunk_start_line: get_u32(fields::CHUNK_START_LINE),
                    chunk_end_line: get_u32(fields::CHUNK_END_LINE),
                })
            })
            .collect();

        // Qdrant orders by score; make the tie-break deterministic.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        Ok(hits)
    }

    /// Exact count of chunk documents stored for one file.
    pub async fn count_by_file(&self, collection: &str, repo: &str, file_path: &str) -> Result<u64> {
        if !self.collection_exists(collection).await? {
            return Ok(0);
        }
        let filter = Filter::must([
            Condition::matches(fields::REPOSITORY, repo.to_string()),
            Condition::matches(fields::FILE_PATH, file_path.to_string()),
        ]);
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).filter(filter).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    pub async fn get_stats(&self, collection: &str) -> Result<CollectionStats> {
        let info = self.client.collection_info(collection).await?;
        let points_count = info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or_default();
        Ok(CollectionStats {
            name: collection.to_string(),
            points_count,
        })
    }

    pub async fn health_check(&self) -> Result<bool> {
        Ok(self.client.health_check().await.is_ok())
    }
}
