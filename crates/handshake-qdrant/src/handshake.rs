use std::sync::Arc;

use async_trait::async_trait;
use handshake_core::{
    check_dimensions, resolve_dimension, Chunk, DistanceMetric, Embeddings, Handshake,
    HandshakeError, IndexSpec, Ownership, SearchResult,
};
use qdrant_client::qdrant::{
    vectors_config::Config as VectorsConfigKind, CountPointsBuilder, CreateCollectionBuilder,
    Distance, HnswConfigDiffBuilder, PointStruct, SearchPointsBuilder, UpdateCollectionBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;

use crate::config::{QdrantConnection, QdrantHandshakeConfig};
use crate::convert::{
    from_qdrant_distance, json_map_to_qdrant, point_id, point_uuid, qdrant_map_to_json,
    record_payload, score_to_distance, search_result_from_payload, to_qdrant_distance,
};
use crate::local::{LocalPoint, LocalStore};

enum Backend {
    Remote(Arc<Qdrant>),
    Local(LocalStore),
}

/// A [`Handshake`] that writes chunks as points of a Qdrant collection.
///
/// Each point carries:
/// - **id**: the record id if it is a UUID, else a UUID v5 derived from it
/// - **vector**: the chunk embedding
/// - **payload**: `id`, `text`, `start_index`, `end_index`, `token_count`,
///   `metadata` and `created_at`
///
/// A collection is bound to the metric it was created with; searches and
/// index requests for any other metric fail.
pub struct QdrantHandshake {
    backend: Backend,
    ownership: Ownership,
    collection: String,
    dimension: usize,
    metric: DistanceMetric,
    embeddings: Arc<dyn Embeddings>,
}

impl QdrantHandshake {
    /// Resolve the connection and embedding model, then make sure the
    /// collection exists with the expected vector width.
    pub async fn new(config: QdrantHandshakeConfig) -> Result<Self, HandshakeError> {
        let connection = config.resolve_connection()?;
        let embeddings = config.embedding_model.resolve()?;
        let dimension = resolve_dimension(embeddings.as_ref(), config.vector_dimensions).await?;
        let collection = config.collection.resolve();
        if collection.is_empty() {
            return Err(HandshakeError::Configuration(
                "collection name must not be empty".to_string(),
            ));
        }

        let (backend, ownership) = match connection {
            QdrantConnection::Client(client) => (Backend::Remote(client), Ownership::Injected),
            QdrantConnection::Url { url, api_key } => {
                let mut builder = Qdrant::from_url(&url);
                if let Some(api_key) = api_key {
                    builder = builder.api_key(api_key);
                }
                let client = builder.build().map_err(|e| {
                    HandshakeError::Configuration(format!("failed to build Qdrant client: {e}"))
                })?;
                tracing::info!(url = %url, "connected to Qdrant server");
                (Backend::Remote(Arc::new(client)), Ownership::Owned)
            }
            QdrantConnection::Path(path) => {
                let store = LocalStore::open(&path).await?;
                tracing::info!(path = %path.display(), "opened local Qdrant store");
                (Backend::Local(store), Ownership::Owned)
            }
            QdrantConnection::Memory => {
                tracing::info!("using in-memory Qdrant store");
                (Backend::Local(LocalStore::memory()), Ownership::Owned)
            }
        };

        let mut handshake = Self {
            backend,
            ownership,
            collection,
            dimension,
            metric: config.distance,
            embeddings,
        };
        handshake.metric = handshake.ensure_collection(config.distance).await?;
        Ok(handshake)
    }

    /// Create the collection if needed and return the metric it uses.
    async fn ensure_collection(
        &self,
        requested: DistanceMetric,
    ) -> Result<DistanceMetric, HandshakeError> {
        let existing = match &self.backend {
            Backend::Remote(client) => self.remote_collection_info(client).await?,
            Backend::Local(store) => store.collection_info(&self.collection).await,
        };

        if let Some((dimension, metric)) = existing {
            if dimension != self.dimension {
                return Err(HandshakeError::SchemaMismatch(format!(
                    "collection '{}' stores {dimension}-dimensional vectors, expected {}",
                    self.collection, self.dimension
                )));
            }
            if metric != requested {
                tracing::warn!(
                    collection = %self.collection,
                    existing = %metric,
                    requested = %requested,
                    "collection already exists with a different metric, keeping it"
                );
            }
            return Ok(metric);
        }

        match &self.backend {
            Backend::Remote(client) => {
                client
                    .create_collection(
                        CreateCollectionBuilder::new(&self.collection).vectors_config(
                            VectorParamsBuilder::new(
                                self.dimension as u64,
                                to_qdrant_distance(requested),
                            ),
                        ),
                    )
                    .await
                    .map_err(|e| {
                        HandshakeError::Configuration(format!("failed to create collection: {e}"))
                    })?;
            }
            Backend::Local(store) => {
                store
                    .create_collection(&self.collection, self.dimension, requested)
                    .await?;
            }
        }

        tracing::info!(
            collection = %self.collection,
            dimension = self.dimension,
            metric = %requested,
            "created collection"
        );
        Ok(requested)
    }

    async fn remote_collection_info(
        &self,
        client: &Qdrant,
    ) -> Result<Option<(usize, DistanceMetric)>, HandshakeError> {
        let exists = client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| {
                HandshakeError::Configuration(format!("collection_exists check failed: {e}"))
            })?;
        if !exists {
            return Ok(None);
        }

        let info = client
            .collection_info(&self.collection)
            .await
            .map_err(|e| {
                HandshakeError::Configuration(format!("failed to read collection info: {e}"))
            })?;

        let vectors = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);

        match vectors {
            Some(VectorsConfigKind::Params(params)) => {
                let distance = Distance::try_from(params.distance).map_err(|_| {
                    HandshakeError::SchemaMismatch(format!(
                        "collection '{}' reports unknown distance {}",
                        self.collection, params.distance
                    ))
                })?;
                Ok(Some((params.size as usize, from_qdrant_distance(distance)?)))
            }
            Some(VectorsConfigKind::ParamsMap(_)) => Err(HandshakeError::SchemaMismatch(format!(
                "collection '{}' uses named vectors, a single unnamed vector is required",
                self.collection
            ))),
            None => Err(HandshakeError::SchemaMismatch(format!(
                "collection '{}' has no vector configuration",
                self.collection
            ))),
        }
    }

    fn check_metric(
        &self,
        metric: DistanceMetric,
        err: fn(String) -> HandshakeError,
    ) -> Result<(), HandshakeError> {
        if metric != self.metric {
            return Err(err(format!(
                "collection '{}' is configured for {} distance, {metric} is not supported",
                self.collection, self.metric
            )));
        }
        Ok(())
    }

    /// Name of the collection this handshake writes to.
    pub fn destination_name(&self) -> &str {
        &self.collection
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Metric the collection was created with.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of points currently stored in the collection.
    pub async fn count(&self) -> Result<usize, HandshakeError> {
        match &self.backend {
            Backend::Remote(client) => {
                let response = client
                    .count(CountPointsBuilder::new(&self.collection).exact(true))
                    .await
                    .map_err(|e| HandshakeError::Query(format!("count failed: {e}")))?;
                Ok(response.result.map_or(0, |r| r.count as usize))
            }
            Backend::Local(store) => Ok(store.count(&self.collection).await),
        }
    }

    /// The remote client, or `None` for the embedded store.
    pub fn client(&self) -> Option<&Qdrant> {
        match &self.backend {
            Backend::Remote(client) => Some(client.as_ref()),
            Backend::Local(_) => None,
        }
    }

    /// Release the connection if this handshake opened it. Local stores are
    /// flushed to disk first; injected clients are left untouched.
    pub async fn close(self) -> Result<(), HandshakeError> {
        if self.ownership == Ownership::Injected {
            return Ok(());
        }
        if let Backend::Local(store) = &self.backend {
            store.flush().await?;
        }
        tracing::debug!(collection = %self.collection, "closed Qdrant handshake");
        Ok(())
    }
}

#[async_trait]
impl Handshake for QdrantHandshake {
    async fn write(&self, chunks: &[Chunk]) -> Result<Vec<String>, HandshakeError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = chunks.iter().map(Chunk::record_id).collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embeddings.embed_documents(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(HandshakeError::Embedding(format!(
                "model returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        check_dimensions(&vectors, self.dimension)?;

        let created_at = chrono::Utc::now().to_rfc3339();

        match &self.backend {
            Backend::Remote(client) => {
                let points: Vec<PointStruct> = chunks
                    .iter()
                    .zip(&ids)
                    .zip(vectors)
                    .map(|((chunk, id), vector)| {
                        let payload = record_payload(id, chunk, &created_at);
                        PointStruct::new(point_id(id), vector, json_map_to_qdrant(&payload))
                    })
                    .collect();

                client
                    .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
                    .await
                    .map_err(|e| HandshakeError::Write(format!("upsert failed: {e}")))?;
            }
            Backend::Local(store) => {
                let points = chunks
                    .iter()
                    .zip(&ids)
                    .zip(vectors)
                    .map(|((chunk, id), vector)| {
                        let point = LocalPoint {
                            vector,
                            payload: record_payload(id, chunk, &created_at),
                        };
                        (point_uuid(id), point)
                    })
                    .collect();
                store.upsert(&self.collection, points).await?;
            }
        }

        tracing::debug!(collection = %self.collection, count = ids.len(), "wrote chunks");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<SearchResult>, HandshakeError> {
        if limit == 0 {
            return Err(HandshakeError::Query("limit must be > 0".to_string()));
        }
        self.check_metric(metric, HandshakeError::Query)?;

        let query_vec = self.embeddings.embed_query(query).await?;

        let mut results: Vec<SearchResult> = match &self.backend {
            Backend::Remote(client) => {
                let response = client
                    .search_points(
                        SearchPointsBuilder::new(&self.collection, query_vec, limit as u64)
                            .with_payload(true),
                    )
                    .await
                    .map_err(|e| HandshakeError::Query(format!("search failed: {e}")))?;

                response
                    .result
                    .into_iter()
                    .map(|point| {
                        let fallback_id = point
                            .id
                            .as_ref()
                            .map(|pid| format!("{pid:?}"))
                            .unwrap_or_default();
                        search_result_from_payload(
                            &qdrant_map_to_json(&point.payload),
                            fallback_id,
                            score_to_distance(metric, point.score),
                        )
                    })
                    .collect()
            }
            Backend::Local(store) => store
                .search(&self.collection, &query_vec, limit)
                .await?
                .into_iter()
                .map(|(point_id, payload, distance)| {
                    search_result_from_payload(&payload, point_id, distance)
                })
                .collect(),
        };

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(
            collection = %self.collection,
            metric = %metric,
            hits = results.len(),
            "searched collection"
        );
        Ok(results)
    }

    async fn create_index(
        &self,
        spec: IndexSpec,
        metric: DistanceMetric,
    ) -> Result<(), HandshakeError> {
        spec.validate()?;
        let IndexSpec::Hnsw { m, ef_construction } = spec else {
            return Err(HandshakeError::Index(format!(
                "Qdrant does not support {} indexes",
                spec.family()
            )));
        };
        self.check_metric(metric, HandshakeError::Index)?;

        match &self.backend {
            Backend::Remote(client) => {
                client
                    .update_collection(
                        UpdateCollectionBuilder::new(&self.collection).hnsw_config(
                            HnswConfigDiffBuilder::default()
                                .m(m as u64)
                                .ef_construct(ef_construction as u64),
                        ),
                    )
                    .await
                    .map_err(|e| HandshakeError::Index(format!("failed to update HNSW config: {e}")))?;
                tracing::info!(
                    collection = %self.collection,
                    m,
                    ef_construction,
                    "updated HNSW index"
                );
            }
            Backend::Local(_) => {
                // The embedded store always scans exhaustively.
                tracing::debug!(collection = %self.collection, "index request ignored by local store");
            }
        }
        Ok(())
    }
}
