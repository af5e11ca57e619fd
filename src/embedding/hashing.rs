//! Deterministic feature-hashing embeddings
//!
//! Not semantically meaningful like a neural model, but stable across runs and
//! machines, content dependent, and free of downloads. Used for offline
//! operation and throughout the test suite.

use super::{EmbeddingError, EmbeddingProvider};

pub const HASHING_MODEL_NAME: &str = "hashing-v1";

/// Weight of a whole word relative to one of its character trigrams
const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::InitializationError(
                "hashing dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// Signed bucket for a feature, derived from its BLAKE3 digest
    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = blake3::hash(feature.as_bytes());
        let bytes = digest.as_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        let value = u64::from_le_bytes(head);
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((value % self.dimension as u64) as usize, sign)
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();

        for word in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let (idx, sign) = self.bucket(word);
            embedding[idx] += sign * WORD_WEIGHT;

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let (idx, sign) = self.bucket(&format!("#{trigram}"));
                embedding[idx] += sign * TRIGRAM_WEIGHT;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        } else {
            // featureless text still maps to a unit vector
            embedding[0] = 1.0;
        }
        embedding
    }
}

impl EmbeddingProvider for HashingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.encode(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.encode(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASHING_MODEL_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::dot;

    #[test]
    fn test_deterministic_unit_vectors() {
        let provider = HashingProvider::new(64).unwrap();
        let a = provider.embed("Nmap scan report for target").unwrap();
        let b = provider.embed("Nmap scan report for target").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_overlapping_text_is_closer() {
        let provider = HashingProvider::new(256).unwrap();
        let base = provider.embed("apache log4j remote code execution").unwrap();
        let near = provider.embed("log4j remote code execution in apache").unwrap();
        let far = provider.embed("chocolate cake recipe with berries").unwrap();
        assert!(dot(&base, &near) > dot(&base, &far));
    }

    #[test]
    fn test_empty_text_is_unit() {
        let provider = HashingProvider::new(16).unwrap();
        let v = provider.embed("").unwrap();
        assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_batch_matches_single() {
        let provider = HashingProvider::new(32).unwrap();
        let texts = vec!["Alpha text".to_string(), "Beta text".to_string()];
        let batch = provider.embed_batch(&texts).unwrap();
        assert_eq!(batch[0], provider.embed("Alpha text").unwrap());
        assert_eq!(batch[1], provider.embed("Beta text").unwrap());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingProvider::new(0).is_err());
    }
}
