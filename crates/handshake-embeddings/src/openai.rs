use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use handshake_core::{DistanceMetric, Embeddings, HandshakeError};
use serde::Deserialize;
use serde_json::json;
use tiktoken_rs::CoreBPE;

use crate::backend::{HttpBackend, ProviderBackend, ProviderRequest};

/// Known OpenAI embedding models: output width and tokenizer encoding.
pub(crate) const OPENAI_MODELS: &[(&str, usize, &str)] = &[
    ("text-embedding-3-small", 1536, "cl100k_base"),
    ("text-embedding-3-large", 3072, "cl100k_base"),
    ("text-embedding-ada-002", 1536, "cl100k_base"),
];

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_BATCH_SIZE: usize = 128;
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Input limit of the OpenAI embedding endpoint, in tokens.
pub const OPENAI_TOKEN_LIMIT: usize = 8191;

pub(crate) fn known_dimension(model: &str) -> Option<usize> {
    OPENAI_MODELS
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, dims, _)| *dims)
}

fn known_encoding(model: &str) -> Option<&'static str> {
    OPENAI_MODELS
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, _, encoding)| *encoding)
}

fn load_encoding(encoding: &str) -> Result<CoreBPE, HandshakeError> {
    let loaded = match encoding {
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "o200k_base" => tiktoken_rs::o200k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "p50k_edit" => tiktoken_rs::p50k_edit(),
        "r50k_base" => tiktoken_rs::r50k_base(),
        other => {
            return Err(HandshakeError::ModelResolution(format!(
                "unknown tokenizer encoding '{other}'"
            )))
        }
    };
    loaded.map_err(|e| {
        HandshakeError::ModelResolution(format!("failed to load tokenizer '{encoding}': {e}"))
    })
}

#[derive(Clone)]
pub struct OpenAiEmbeddingsConfig {
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Required for models outside the known table.
    pub dimension: Option<usize>,
    /// tiktoken encoding name. Required for models outside the known table.
    pub tokenizer: Option<String>,
    /// Maximum number of texts sent in one request.
    pub batch_size: usize,
    pub timeout: Duration,
    /// Log a warning for texts over the token limit.
    pub show_warnings: bool,
}

impl OpenAiEmbeddingsConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            dimension: None,
            tokenizer: None,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: Duration::from_secs(60),
            show_warnings: true,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Point at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// e.g. `"cl100k_base"` or `"o200k_base"`.
    pub fn with_tokenizer(mut self, encoding: impl Into<String>) -> Self {
        self.tokenizer = Some(encoding.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_show_warnings(mut self, show_warnings: bool) -> Self {
        self.show_warnings = show_warnings;
        self
    }
}

impl Default for OpenAiEmbeddingsConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl fmt::Debug for OpenAiEmbeddingsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbeddingsConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("dimension", &self.dimension)
            .field("tokenizer", &self.tokenizer)
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .field("show_warnings", &self.show_warnings)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embeddings served by the OpenAI `/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    backend: Arc<dyn ProviderBackend>,
    tokenizer: Arc<CoreBPE>,
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
    batch_size: usize,
    show_warnings: bool,
}

impl OpenAiEmbeddings {
    /// Build a provider that talks HTTP, resolving width, tokenizer and API
    /// key up front.
    pub fn new(config: OpenAiEmbeddingsConfig) -> Result<Self, HandshakeError> {
        let backend = HttpBackend::with_timeout(config.timeout)?;
        Self::with_backend(config, Arc::new(backend))
    }

    /// Same as [`new`](Self::new) over a caller-supplied transport.
    pub fn with_backend(
        config: OpenAiEmbeddingsConfig,
        backend: Arc<dyn ProviderBackend>,
    ) -> Result<Self, HandshakeError> {
        let dimension = config
            .dimension
            .or_else(|| known_dimension(&config.model))
            .ok_or_else(|| {
                HandshakeError::ModelResolution(format!(
                    "unknown OpenAI model '{}': provide its dimension explicitly",
                    config.model
                ))
            })?;

        let encoding = config
            .tokenizer
            .as_deref()
            .or_else(|| known_encoding(&config.model))
            .ok_or_else(|| {
                HandshakeError::ModelResolution(format!(
                    "no tokenizer known for model '{}': provide one explicitly",
                    config.model
                ))
            })?;
        let tokenizer = load_encoding(encoding)?;

        let api_key = config
            .api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                HandshakeError::Configuration(format!(
                    "OpenAI API key not found: pass it explicitly or set {API_KEY_ENV}"
                ))
            })?;

        Ok(Self {
            backend,
            tokenizer: Arc::new(tokenizer),
            api_key,
            model: config.model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            dimension,
            batch_size: config.batch_size.max(1),
            show_warnings: config.show_warnings,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Number of tokens the model's tokenizer produces for `text`.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.encode_with_special_tokens(text).len()
    }

    pub fn count_tokens_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|text| self.count_tokens(text)).collect()
    }

    /// Cosine similarity of two embeddings.
    pub fn similarity(&self, u: &[f32], v: &[f32]) -> f32 {
        1.0 - DistanceMetric::Cosine.distance(u, v)
    }

    fn warn_if_too_long(&self, texts: &[&str]) {
        if !self.show_warnings {
            return;
        }
        for (position, tokens) in self.count_tokens_batch(texts).into_iter().enumerate() {
            if tokens > OPENAI_TOKEN_LIMIT {
                tracing::warn!(
                    model = %self.model,
                    position,
                    tokens,
                    limit = OPENAI_TOKEN_LIMIT,
                    "text exceeds the model's token limit and will be truncated"
                );
            }
        }
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, HandshakeError> {
        let request = ProviderRequest {
            url: format!("{}/embeddings", self.base_url),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {}", self.api_key)),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body: json!({
                "model": self.model,
                "input": texts,
            }),
        };

        let response = self.backend.send(request).await?;
        if response.status != 200 {
            return Err(HandshakeError::Embedding(format!(
                "OpenAI API error ({}): {}",
                response.status, response.body
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_value(response.body)
            .map_err(|e| HandshakeError::Embedding(format!("OpenAI parse: {e}")))?;

        // The API does not promise response order.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        if data.len() != texts.len() {
            return Err(HandshakeError::Embedding(format!(
                "OpenAI returned {} embeddings for {} inputs",
                data.len(),
                texts.len()
            )));
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embeddings for OpenAiEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, HandshakeError> {
        let mut all = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            self.warn_if_too_long(batch);
            match self.request(batch).await {
                Ok(vectors) => all.extend(vectors),
                Err(e) if batch.len() > 1 => {
                    tracing::warn!(
                        model = %self.model,
                        batch_len = batch.len(),
                        error = %e,
                        "batch embedding failed, retrying one text at a time"
                    );
                    for text in batch {
                        all.push(self.embed_query(text).await?);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(all)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, HandshakeError> {
        self.warn_if_too_long(&[text]);
        self.request(&[text])
            .await?
            .pop()
            .ok_or_else(|| HandshakeError::Embedding("empty response".to_string()))
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }
}
