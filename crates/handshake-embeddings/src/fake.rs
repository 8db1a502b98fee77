use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use handshake_core::{Embeddings, HandshakeError};

/// Deterministic embeddings for tests and offline runs.
///
/// Each text maps to a pseudo-random unit vector derived from a hash of its
/// bytes, so identical texts embed identically and distinct texts point in
/// unrelated directions.
#[derive(Debug, Clone)]
pub struct FakeEmbeddings {
    dimensions: usize,
}

impl FakeEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                // Map the hash onto [-1, 1].
                (hasher.finish() as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vec.iter_mut().for_each(|x| *x /= norm);
        }
        vec
    }
}

impl Default for FakeEmbeddings {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl Embeddings for FakeEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, HandshakeError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, HandshakeError> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimensions)
    }
}
