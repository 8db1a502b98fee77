use std::fmt;
use std::sync::Arc;

use handshake_core::{Embeddings, HandshakeError};

use crate::openai::known_dimension;
use crate::{
    FakeEmbeddings, OllamaEmbeddings, OllamaEmbeddingsConfig, OpenAiEmbeddings,
    OpenAiEmbeddingsConfig,
};

/// An embedding model given either by name or as a ready provider.
///
/// Recognised names:
///
/// | name                    | provider                                   |
/// |-------------------------|--------------------------------------------|
/// | `openai/<model>`        | [`OpenAiEmbeddings`] (key from env)        |
/// | `<known OpenAI model>`  | same as `openai/<model>`                   |
/// | `ollama/<model>`        | [`OllamaEmbeddings`] on `localhost:11434`  |
/// | `fake` / `fake/<dims>`  | [`FakeEmbeddings`]                         |
#[derive(Clone)]
pub enum EmbeddingSource {
    Named(String),
    Instance(Arc<dyn Embeddings>),
}

impl EmbeddingSource {
    /// Turn the source into a provider, loading named models through the
    /// lookup table.
    pub fn resolve(&self) -> Result<Arc<dyn Embeddings>, HandshakeError> {
        match self {
            EmbeddingSource::Instance(embeddings) => Ok(Arc::clone(embeddings)),
            EmbeddingSource::Named(name) => resolve_named(name),
        }
    }
}

fn resolve_named(name: &str) -> Result<Arc<dyn Embeddings>, HandshakeError> {
    let (provider, model) = match name.split_once('/') {
        Some((provider, model)) => (provider, model),
        None if known_dimension(name).is_some() => ("openai", name),
        None => (name, ""),
    };

    match (provider, model) {
        ("fake", "") => Ok(Arc::new(FakeEmbeddings::default())),
        ("fake", dims) => {
            let dims: usize = dims.parse().map_err(|_| {
                HandshakeError::ModelResolution(format!("invalid fake dimensions in '{name}'"))
            })?;
            Ok(Arc::new(FakeEmbeddings::new(dims)))
        }
        ("openai", model) if !model.is_empty() => Ok(Arc::new(OpenAiEmbeddings::new(
            OpenAiEmbeddingsConfig::new(model),
        )?)),
        ("ollama", model) if !model.is_empty() => Ok(Arc::new(OllamaEmbeddings::new(
            OllamaEmbeddingsConfig::new(model),
        ))),
        _ => Err(HandshakeError::ModelResolution(format!(
            "unknown embedding model '{name}'"
        ))),
    }
}

impl fmt::Debug for EmbeddingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingSource::Named(name) => f.debug_tuple("Named").field(name).finish(),
            EmbeddingSource::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

impl From<&str> for EmbeddingSource {
    fn from(name: &str) -> Self {
        EmbeddingSource::Named(name.to_string())
    }
}

impl From<String> for EmbeddingSource {
    fn from(name: String) -> Self {
        EmbeddingSource::Named(name)
    }
}

impl From<Arc<dyn Embeddings>> for EmbeddingSource {
    fn from(embeddings: Arc<dyn Embeddings>) -> Self {
        EmbeddingSource::Instance(embeddings)
    }
}

impl Default for EmbeddingSource {
    fn default() -> Self {
        EmbeddingSource::Named("text-embedding-3-small".to_string())
    }
}
