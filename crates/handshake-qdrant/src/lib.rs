//! Qdrant handshake.
//!
//! [`QdrantHandshake`] embeds [`Chunk`]s and upserts them as points in a
//! [Qdrant](https://qdrant.tech/) collection. The connection is resolved from
//! [`QdrantHandshakeConfig`]: an injected client, a server URL, a local path,
//! or (by default) an in-process store.
//!
//! # Example
//!
//! ```rust,no_run
//! use handshake_qdrant::{Chunk, Handshake, QdrantHandshake, QdrantHandshakeConfig};
//!
//! # async fn example() -> Result<(), handshake_core::HandshakeError> {
//! let config = QdrantHandshakeConfig::new("my_collection", "fake/64")
//!     .with_url("http://localhost:6334");
//! let handshake = QdrantHandshake::new(config).await?;
//! let ids = handshake.write(&[Chunk::new("hello world", 0, 11, 2)]).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod convert;
mod handshake;
mod local;

pub use config::QdrantHandshakeConfig;
pub use handshake::QdrantHandshake;

pub use handshake_core::{
    Chunk, DistanceMetric, Embeddings, Handshake, HandshakeError, IndexSpec, SearchResult,
};
