//! Handshake: embed pre-computed text chunks and upsert them into a vector
//! store, then search them back.
//!
//! This crate re-exports the Handshake sub-crates for single-import usage.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `default` | `qdrant`, `pgvector` |
//! | `qdrant` | `QdrantHandshake` (remote server, local path, or in-memory) |
//! | `pgvector` | `PgvectorHandshake` (PostgreSQL with the pgvector extension) |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use handshake::core::{Chunk, DistanceMetric, Handshake};
//! use handshake::qdrant::{QdrantHandshake, QdrantHandshakeConfig};
//!
//! let handshake = QdrantHandshake::new(QdrantHandshakeConfig::new("auto", "fake/8")).await?;
//! handshake.write(&[Chunk::new("hello", 0, 5, 1)]).await?;
//! let hits = handshake.search("hello", 3, DistanceMetric::Cosine).await?;
//! ```

/// Core types and traits: Chunk, SearchResult, DistanceMetric, IndexSpec,
/// Embeddings, Handshake, HandshakeError. Always available.
pub use handshake_core as core;

/// Embedding providers (OpenAI, Ollama, Fake) and model-name resolution.
/// Always available.
pub use handshake_embeddings as embeddings;

/// Qdrant handshake.
#[cfg(feature = "qdrant")]
pub use handshake_qdrant as qdrant;

/// PostgreSQL + pgvector handshake.
#[cfg(feature = "pgvector")]
pub use handshake_pgvector as pgvector;
