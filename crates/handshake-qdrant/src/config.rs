use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use handshake_core::{DestinationName, DistanceMetric, HandshakeError};
use handshake_embeddings::EmbeddingSource;
use qdrant_client::Qdrant;

// ---------------------------------------------------------------------------
// QdrantHandshakeConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`QdrantHandshake`](crate::QdrantHandshake).
///
/// At most one connection strategy may be given: a prebuilt `client`, a
/// server `url` (with an optional `api_key`), or a local `path`. With none of
/// them the handshake runs against an in-process, in-memory store.
#[derive(Clone)]
pub struct QdrantHandshakeConfig {
    pub client: Option<Arc<Qdrant>>,
    pub collection: DestinationName,
    pub embedding_model: EmbeddingSource,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub path: Option<PathBuf>,
    /// Vector width. Taken from the embedding model when unset.
    pub vector_dimensions: Option<usize>,
    /// Metric new collections are created with. Defaults to `Cosine`.
    pub distance: DistanceMetric,
}

impl QdrantHandshakeConfig {
    /// `collection` may be `"auto"` to generate a unique name.
    pub fn new(
        collection: impl Into<DestinationName>,
        embedding_model: impl Into<EmbeddingSource>,
    ) -> Self {
        Self {
            client: None,
            collection: collection.into(),
            embedding_model: embedding_model.into(),
            url: None,
            api_key: None,
            path: None,
            vector_dimensions: None,
            distance: DistanceMetric::Cosine,
        }
    }

    /// Reuse an existing client. The caller keeps ownership of it.
    pub fn with_client(mut self, client: impl Into<Arc<Qdrant>>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Connect to a Qdrant server (gRPC URL, e.g. `http://localhost:6334`).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Run the embedded store, persisted under this directory.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_vector_dimensions(mut self, dimensions: usize) -> Self {
        self.vector_dimensions = Some(dimensions);
        self
    }

    pub fn with_distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = distance;
        self
    }

    /// Pick the single connection strategy, rejecting conflicting options.
    pub(crate) fn resolve_connection(&self) -> Result<QdrantConnection, HandshakeError> {
        let conflict = |a: &str, b: &str| {
            Err(HandshakeError::Configuration(format!(
                "'{a}' and '{b}' are mutually exclusive"
            )))
        };

        if let Some(client) = &self.client {
            if self.url.is_some() {
                return conflict("client", "url");
            }
            if self.path.is_some() {
                return conflict("client", "path");
            }
            if self.api_key.is_some() {
                return conflict("client", "api_key");
            }
            return Ok(QdrantConnection::Client(Arc::clone(client)));
        }

        if let Some(url) = &self.url {
            if self.path.is_some() {
                return conflict("url", "path");
            }
            if url.trim().is_empty() {
                return Err(HandshakeError::Configuration(
                    "url must not be empty".to_string(),
                ));
            }
            return Ok(QdrantConnection::Url {
                url: url.clone(),
                api_key: self.api_key.clone(),
            });
        }

        if self.api_key.is_some() {
            return Err(HandshakeError::Configuration(
                "api_key given without a url to authenticate against".to_string(),
            ));
        }

        match &self.path {
            Some(path) => Ok(QdrantConnection::Path(path.clone())),
            None => Ok(QdrantConnection::Memory),
        }
    }
}

impl fmt::Debug for QdrantHandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdrantHandshakeConfig")
            .field("client", &self.client.as_ref().map(|_| ".."))
            .field("collection", &self.collection)
            .field("embedding_model", &self.embedding_model)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("path", &self.path)
            .field("vector_dimensions", &self.vector_dimensions)
            .field("distance", &self.distance)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// QdrantConnection
// ---------------------------------------------------------------------------

/// The connection strategy selected from a config.
pub(crate) enum QdrantConnection {
    Client(Arc<Qdrant>),
    Url { url: String, api_key: Option<String> },
    Path(PathBuf),
    Memory,
}
