//! Embedding capability consumed by the store
//!
//! Architecture:
//! - EmbeddingProvider trait for abstraction
//! - FastEmbedProvider for local neural embedding (all-MiniLM-L6-v2, 384-dim)
//! - HashingProvider for deterministic offline embedding
//! - BatchEmbedder for chunking, validation and normalization

mod batch;
mod hashing;
mod provider;

pub use batch::BatchEmbedder;
pub use hashing::{HashingProvider, HASHING_MODEL_NAME};
#[cfg(feature = "fastembed")]
pub use provider::FastEmbedProvider;
pub use provider::{EmbeddingError, EmbeddingProvider};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Instantiate the provider named by `config.model`
///
/// `"hashing"` selects [`HashingProvider`] at `config.dimension`; any other
/// name is handed to FastEmbed.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.model.as_str() {
        "hashing" | HASHING_MODEL_NAME => Ok(Arc::new(HashingProvider::new(config.dimension)?)),
        #[cfg(feature = "fastembed")]
        other => Ok(Arc::new(FastEmbedProvider::new(other)?)),
        #[cfg(not(feature = "fastembed"))]
        other => Err(EmbeddingError::InitializationError(format!(
            "Model {} requires the `fastembed` feature; use model = \"hashing\" instead",
            other
        ))),
    }
}
