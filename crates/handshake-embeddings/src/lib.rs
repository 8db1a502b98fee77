//! Embedding providers for Handshake.
//!
//! Every provider implements [`Embeddings`](handshake_core::Embeddings).
//! [`EmbeddingSource`] lets a handshake accept either a model name, resolved
//! through a lookup table, or an already constructed provider.
//!
//! ```rust,no_run
//! use handshake_embeddings::EmbeddingSource;
//!
//! # fn example() -> Result<(), handshake_core::HandshakeError> {
//! let embeddings = EmbeddingSource::from("openai/text-embedding-3-small").resolve()?;
//! assert_eq!(embeddings.dimension(), Some(1536));
//! # Ok(())
//! # }
//! ```

mod backend;
mod fake;
mod ollama;
mod openai;
mod source;

pub use backend::{FakeBackend, HttpBackend, ProviderBackend, ProviderRequest, ProviderResponse};
pub use fake::FakeEmbeddings;
pub use ollama::{OllamaEmbeddings, OllamaEmbeddingsConfig};
pub use openai::{OpenAiEmbeddings, OpenAiEmbeddingsConfig, OPENAI_TOKEN_LIMIT};
pub use source::EmbeddingSource;

pub use handshake_core::Embeddings;
