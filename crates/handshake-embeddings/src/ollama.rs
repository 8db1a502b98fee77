use std::sync::Arc;

use async_trait::async_trait;
use handshake_core::{Embeddings, HandshakeError};
use serde::Deserialize;
use serde_json::json;

use crate::backend::{HttpBackend, ProviderBackend, ProviderRequest};

/// Widths of commonly pulled Ollama embedding models.
pub(crate) const OLLAMA_MODELS: &[(&str, usize)] = &[
    ("nomic-embed-text", 768),
    ("mxbai-embed-large", 1024),
    ("all-minilm", 384),
];

#[derive(Debug, Clone)]
pub struct OllamaEmbeddingsConfig {
    pub model: String,
    pub base_url: String,
    /// Overrides the width table; probed at provisioning time when both are absent.
    pub dimension: Option<usize>,
}

impl OllamaEmbeddingsConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: "http://localhost:11434".to_string(),
            dimension: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings served by a local Ollama instance through `/api/embed`.
pub struct OllamaEmbeddings {
    config: OllamaEmbeddingsConfig,
    backend: Arc<dyn ProviderBackend>,
}

impl OllamaEmbeddings {
    pub fn new(config: OllamaEmbeddingsConfig) -> Self {
        Self::with_backend(config, Arc::new(HttpBackend::new()))
    }

    pub fn with_backend(config: OllamaEmbeddingsConfig, backend: Arc<dyn ProviderBackend>) -> Self {
        Self { config, backend }
    }
}

#[async_trait]
impl Embeddings for OllamaEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, HandshakeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = ProviderRequest {
            url: format!("{}/api/embed", self.config.base_url.trim_end_matches('/')),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: json!({
                "model": self.config.model,
                "input": texts,
            }),
        };

        let response = self.backend.send(request).await?;
        match response.status {
            200 => {}
            // Ollama answers 404 for models that were never pulled.
            404 => {
                return Err(HandshakeError::ModelResolution(format!(
                    "Ollama model '{}' not found: {}",
                    self.config.model, response.body
                )))
            }
            status => {
                return Err(HandshakeError::Embedding(format!(
                    "Ollama API error ({status}): {}",
                    response.body
                )))
            }
        }

        let parsed: EmbedResponse = serde_json::from_value(response.body)
            .map_err(|e| HandshakeError::Embedding(format!("Ollama parse: {e}")))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(HandshakeError::Embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        Ok(parsed.embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, HandshakeError> {
        self.embed_documents(&[text])
            .await?
            .pop()
            .ok_or_else(|| HandshakeError::Embedding("missing 'embeddings' field".to_string()))
    }

    fn dimension(&self) -> Option<usize> {
        self.config.dimension.or_else(|| {
            OLLAMA_MODELS
                .iter()
                .find(|(name, _)| *name == self.config.model)
                .map(|(_, dims)| *dims)
        })
    }
}
