//! Chunked embedding with output validation
use super::{EmbeddingError, EmbeddingProvider};
use crate::index::normalize;
use std::sync::Arc;
use tracing::debug;

/// Encodes texts in chunks of `batch_size`
///
/// Every output is checked against the provider's dimension, the count is
/// checked against the input, and vectors are re-normalized so downstream
/// inner products are cosine similarities. Any failure fails the whole call.
#[derive(Clone)]
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl BatchEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.provider.embed_batch(chunk)?;
            if embeddings.len() != chunk.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: chunk.len(),
                    actual: embeddings.len(),
                });
            }
            debug!("Embedded chunk of {} texts", chunk.len());
            for embedding in embeddings {
                out.push(self.finish(embedding)?);
            }
        }

        Ok(out)
    }

    pub fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embedding = self.provider.embed(text)?;
        self.finish(embedding)
    }

    fn finish(&self, mut embedding: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        let expected = self.provider.dimension();
        if embedding.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        normalize(&mut embedding);
        Ok(embedding)
    }
}
