use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use handshake_core::{
    check_dimensions, resolve_dimension, Chunk, DistanceMetric, Embeddings, Handshake,
    HandshakeError, IndexSpec, Ownership, SearchResult,
};
use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::{PgConnection, PgvectorHandshakeConfig};
use crate::sql;

type SearchRow = (
    String,
    String,
    Option<i32>,
    Option<i32>,
    Option<i32>,
    Value,
    f64,
);

/// A [`Handshake`] that writes chunks as rows of a pgvector table.
///
/// The table is created on construction if missing. An existing table must
/// have an `embedding` column of the resolved width. Tables are not bound
/// to a metric: every search picks its operator (`<->`, `<=>`, `<#>`) and
/// indexes are built per metric operator class.
pub struct PgvectorHandshake {
    pool: PgPool,
    ownership: Ownership,
    table: String,
    dimension: usize,
    embeddings: Arc<dyn Embeddings>,
}

impl PgvectorHandshake {
    pub async fn new(config: PgvectorHandshakeConfig) -> Result<Self, HandshakeError> {
        let connection = config.resolve_connection()?;
        let table = config.table.resolve();
        sql::validate_table_name(&table)?;
        let embeddings = config.embedding_model.resolve()?;
        let dimension = resolve_dimension(embeddings.as_ref(), config.vector_dimensions).await?;

        let pool_options = PgPoolOptions::new().max_connections(config.max_connections);
        let (pool, ownership) = match connection {
            PgConnection::Pool(pool) => (pool, Ownership::Injected),
            PgConnection::ConnectionString(url) => {
                let pool = pool_options.connect(&url).await.map_err(|e| {
                    HandshakeError::Configuration(format!("failed to connect to PostgreSQL: {e}"))
                })?;
                (pool, Ownership::Owned)
            }
            PgConnection::Options(options) => {
                let host = options.get_host().to_string();
                let pool = pool_options.connect_with(*options).await.map_err(|e| {
                    HandshakeError::Configuration(format!(
                        "failed to connect to PostgreSQL at {host}: {e}"
                    ))
                })?;
                (pool, Ownership::Owned)
            }
        };
        tracing::info!(table = %table, owned = (ownership == Ownership::Owned), "connected to PostgreSQL");

        let handshake = Self {
            pool,
            ownership,
            table,
            dimension,
            embeddings,
        };
        handshake.ensure_table().await?;
        Ok(handshake)
    }

    /// Enable the extension and create the table, or check the width of the
    /// one already there.
    async fn ensure_table(&self) -> Result<(), HandshakeError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                HandshakeError::Configuration(format!("failed to create pgvector extension: {e}"))
            })?;

        let exists: bool = sqlx::query_scalar(sql::TABLE_EXISTS)
            .bind(&self.table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HandshakeError::Configuration(format!("table lookup failed: {e}")))?;

        if exists {
            let width: Option<i32> = sqlx::query_scalar(sql::EMBEDDING_WIDTH)
                .bind(&self.table)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    HandshakeError::Configuration(format!("failed to inspect table: {e}"))
                })?;
            return match width {
                None => Err(HandshakeError::SchemaMismatch(format!(
                    "table '{}' has no embedding column",
                    self.table
                ))),
                Some(width) if width < 0 || width as usize != self.dimension => {
                    Err(HandshakeError::SchemaMismatch(format!(
                        "table '{}' stores {width}-dimensional vectors, expected {}",
                        self.table, self.dimension
                    )))
                }
                Some(_) => {
                    tracing::debug!(table = %self.table, "reusing existing table");
                    Ok(())
                }
            };
        }

        sqlx::query(&sql::create_table(&self.table, self.dimension))
            .execute(&self.pool)
            .await
            .map_err(|e| HandshakeError::Configuration(format!("failed to create table: {e}")))?;

        tracing::info!(table = %self.table, dimension = self.dimension, "created table");
        Ok(())
    }

    /// Name of the table this handshake writes to.
    pub fn destination_name(&self) -> &str {
        &self.table
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of rows currently stored in the table.
    pub async fn count(&self) -> Result<usize, HandshakeError> {
        let count: i64 = sqlx::query_scalar(&sql::count(&self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HandshakeError::Query(format!("count failed: {e}")))?;
        Ok(count.max(0) as usize)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool if this handshake opened it. Injected pools stay open.
    pub async fn close(self) -> Result<(), HandshakeError> {
        if self.ownership == Ownership::Owned {
            self.pool.close().await;
            tracing::debug!(table = %self.table, "closed PostgreSQL pool");
        }
        Ok(())
    }
}

fn to_int(value: usize, field: &str) -> Result<i32, HandshakeError> {
    i32::try_from(value)
        .map_err(|_| HandshakeError::Write(format!("{field} {value} does not fit an INTEGER column")))
}

fn from_int(value: Option<i32>) -> usize {
    value.map_or(0, |v| v.max(0) as usize)
}

#[async_trait]
impl Handshake for PgvectorHandshake {
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

        let upsert_sql = sql::upsert(&self.table);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HandshakeError::Write(format!("failed to begin transaction: {e}")))?;

        for ((chunk, id), vector) in chunks.iter().zip(&ids).zip(vectors) {
            let metadata = Value::Object(chunk.metadata.clone().into_iter().collect());
            sqlx::query(&upsert_sql)
                .bind(id)
                .bind(&chunk.text)
                .bind(Vector::from(vector))
                .bind(to_int(chunk.start_index, "start_index")?)
                .bind(to_int(chunk.end_index, "end_index")?)
                .bind(to_int(chunk.token_count, "token_count")?)
                .bind(&metadata)
                .execute(&mut *tx)
                .await
                .map_err(|e| HandshakeError::Write(format!("insert of '{id}' failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| HandshakeError::Write(format!("commit failed: {e}")))?;

        tracing::debug!(table = %self.table, count = ids.len(), "wrote chunks");
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
        let limit = i64::try_from(limit)
            .map_err(|_| HandshakeError::Query(format!("limit {limit} is too large")))?;

        let query_vec = Vector::from(self.embeddings.embed_query(query).await?);

        let rows: Vec<SearchRow> = sqlx::query_as(&sql::search(&self.table, metric))
            .bind(&query_vec)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HandshakeError::Query(format!("similarity search failed: {e}")))?;

        let results: Vec<SearchResult> = rows
            .into_iter()
            .map(
                |(id, text, start_index, end_index, token_count, metadata, distance)| {
                    let metadata: HashMap<String, Value> = match metadata {
                        Value::Object(map) => map.into_iter().collect(),
                        _ => HashMap::new(),
                    };
                    SearchResult {
                        id,
                        text,
                        distance: distance as f32,
                        start_index: from_int(start_index),
                        end_index: from_int(end_index),
                        token_count: from_int(token_count),
                        metadata,
                    }
                },
            )
            .collect();

        tracing::debug!(
            table = %self.table,
            metric = %metric,
            hits = results.len(),
            "searched table"
        );
        Ok(results)
    }

    async fn create_index(
        &self,
        spec: IndexSpec,
        metric: DistanceMetric,
    ) -> Result<(), HandshakeError> {
        spec.validate()?;
        let statement = sql::create_index(&self.table, &spec, metric);
        sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(|e| HandshakeError::Index(format!("failed to create index: {e}")))?;

        tracing::info!(
            table = %self.table,
            index = %sql::index_name(&self.table, &spec, metric),
            "created vector index"
        );
        Ok(())
    }
}
