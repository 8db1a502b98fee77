use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for every handshake, one variant per failure family.
///
/// Each variant carries the diagnostic reported by the underlying client so
/// callers see the store's own message.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("model resolution error: {0}")]
    ModelResolution(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("write error: {0}")]
    Write(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("index error: {0}")]
    Index(String),
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A span of text produced by a chunker, ready to be embedded and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier. When absent a fresh UUID is assigned on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Chunk {
    pub fn new(
        text: impl Into<String>,
        start_index: usize,
        end_index: usize,
        token_count: usize,
    ) -> Self {
        Self {
            id: None,
            text: text.into(),
            start_index,
            end_index,
            token_count,
            metadata: HashMap::new(),
        }
    }

    /// Pin the record id so repeated writes overwrite the same record.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The caller-supplied id, or a newly generated UUID v4.
    pub fn record_id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// SearchResult
// ---------------------------------------------------------------------------

/// A stored record returned by a similarity search.
///
/// `distance` always follows the "smaller is closer" convention of the
/// [`DistanceMetric`] the search was issued with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub distance: f32,
    pub start_index: usize,
    pub end_index: usize,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// DistanceMetric
// ---------------------------------------------------------------------------

/// Distance function used for nearest-neighbour queries and index builds.
///
/// | metric          | distance                 |
/// |-----------------|--------------------------|
/// | `L2`            | euclidean distance       |
/// | `Cosine`        | `1 - cosine_similarity`  |
/// | `InnerProduct`  | negated dot product      |
///
/// In every case a smaller distance ranks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    L2,
    #[default]
    Cosine,
    InnerProduct,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }

    /// Distance between two vectors of equal length.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::InnerProduct => -dot(a, b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" | "euclid" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            "inner_product" | "ip" | "dot" => Ok(DistanceMetric::InnerProduct),
            other => Err(HandshakeError::Configuration(format!(
                "unknown distance metric '{other}'"
            ))),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (mag_a * mag_b)
}

// ---------------------------------------------------------------------------
// IndexSpec
// ---------------------------------------------------------------------------

/// Similarity index request, passed through to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexSpec {
    /// Graph-based index.
    Hnsw { m: u32, ef_construction: u32 },
    /// Inverted-file index with `lists` partitions.
    IvfFlat { lists: u32 },
}

impl IndexSpec {
    pub const DEFAULT_M: u32 = 16;
    pub const DEFAULT_EF_CONSTRUCTION: u32 = 64;
    pub const DEFAULT_LISTS: u32 = 100;

    /// HNSW with the default fan-out (16) and construction breadth (64).
    pub fn hnsw() -> Self {
        IndexSpec::Hnsw {
            m: Self::DEFAULT_M,
            ef_construction: Self::DEFAULT_EF_CONSTRUCTION,
        }
    }

    pub fn ivf_flat(lists: u32) -> Self {
        IndexSpec::IvfFlat { lists }
    }

    pub fn family(&self) -> &'static str {
        match self {
            IndexSpec::Hnsw { .. } => "hnsw",
            IndexSpec::IvfFlat { .. } => "ivfflat",
        }
    }

    /// Check the family-specific parameters against the ranges stores accept.
    pub fn validate(&self) -> Result<(), HandshakeError> {
        match *self {
            IndexSpec::Hnsw { m, ef_construction } => {
                if !(2..=100).contains(&m) {
                    return Err(HandshakeError::Index(format!(
                        "hnsw m must be between 2 and 100, got {m}"
                    )));
                }
                if !(4..=1000).contains(&ef_construction) {
                    return Err(HandshakeError::Index(format!(
                        "hnsw ef_construction must be between 4 and 1000, got {ef_construction}"
                    )));
                }
                if ef_construction < 2 * m {
                    return Err(HandshakeError::Index(format!(
                        "hnsw ef_construction ({ef_construction}) must be at least 2 * m ({})",
                        2 * m
                    )));
                }
                Ok(())
            }
            IndexSpec::IvfFlat { lists } => {
                if !(1..=32768).contains(&lists) {
                    return Err(HandshakeError::Index(format!(
                        "ivfflat lists must be between 1 and 32768, got {lists}"
                    )));
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Destination naming
// ---------------------------------------------------------------------------

/// Collection or table name requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DestinationName {
    /// Generate a unique name at provisioning time.
    #[default]
    Auto,
    Named(String),
}

impl DestinationName {
    /// Return the concrete name, generating one for [`DestinationName::Auto`].
    pub fn resolve(&self) -> String {
        match self {
            DestinationName::Auto => generate_destination_name(),
            DestinationName::Named(name) => name.clone(),
        }
    }
}

impl From<&str> for DestinationName {
    fn from(name: &str) -> Self {
        if name.eq_ignore_ascii_case("auto") {
            DestinationName::Auto
        } else {
            DestinationName::Named(name.to_string())
        }
    }
}

impl From<String> for DestinationName {
    fn from(name: String) -> Self {
        DestinationName::from(name.as_str())
    }
}

/// A fresh destination name such as `handshake_3f9c0a1b2d4e`, valid both as a
/// Qdrant collection name and as an unquoted SQL identifier.
pub fn generate_destination_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("handshake_{}", &id[..12])
}

// ---------------------------------------------------------------------------
// Connection ownership
// ---------------------------------------------------------------------------

/// Who is responsible for releasing a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Built by the handshake from configuration; released on `close`.
    Owned,
    /// Supplied by the caller, who keeps responsibility for it.
    Injected,
}

// ---------------------------------------------------------------------------
// Embeddings trait
// ---------------------------------------------------------------------------

/// Trait for embedding text into vectors.
#[async_trait]
pub trait Embeddings: Send + Sync {
    /// Embed multiple texts, preserving input order.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, HandshakeError>;

    /// Embed a single text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, HandshakeError>;

    /// Output width, when the provider knows it without a network call.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

const DIMENSION_PROBE: &str = "dimension probe";

/// Determine the vector width for a destination.
///
/// An explicit width wins, then the provider's advertised width, and finally
/// the length of a probe embedding.
pub async fn resolve_dimension(
    embeddings: &dyn Embeddings,
    explicit: Option<usize>,
) -> Result<usize, HandshakeError> {
    let dims = match explicit.or_else(|| embeddings.dimension()) {
        Some(dims) => dims,
        None => embeddings.embed_query(DIMENSION_PROBE).await?.len(),
    };
    if dims == 0 {
        return Err(HandshakeError::Configuration(
            "vector dimensions must be > 0".to_string(),
        ));
    }
    Ok(dims)
}

/// Reject any vector whose width differs from the destination's.
pub fn check_dimensions(vectors: &[Vec<f32>], expected: usize) -> Result<(), HandshakeError> {
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != expected) {
        return Err(HandshakeError::SchemaMismatch(format!(
            "vector {i} has {} dimensions, destination expects {expected}",
            v.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handshake trait
// ---------------------------------------------------------------------------

/// A provisioned connection between chunks and a vector store.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Embed and upsert chunks, returning the record ids in input order.
    async fn write(&self, chunks: &[Chunk]) -> Result<Vec<String>, HandshakeError>;

    /// Return at most `limit` records closest to `query`, nearest first.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<SearchResult>, HandshakeError>;

    /// Ask the store to build a similarity index.
    async fn create_index(
        &self,
        spec: IndexSpec,
        metric: DistanceMetric,
    ) -> Result<(), HandshakeError>;
}
