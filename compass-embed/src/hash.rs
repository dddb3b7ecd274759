//! Deterministic content-hash embeddings
//!
//! Identical texts map to identical unit vectors and different texts to
//! unrelated ones. There is no semantic signal, so this provider is only
//! useful for tests and for exercising a pipeline without a model.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, to_f16_embedding};
use async_trait::async_trait;
use half::f16;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "hash embedding dimension must be greater than zero",
            ));
        }
        Ok(Self { dimension })
    }

    pub fn from_config(config: &EmbedConfig) -> Result<Self> {
        let dimension = config
            .dimension
            .ok_or_else(|| EmbedError::invalid_config("the hash provider needs a dimension"))?;
        Self::new(dimension)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut bytes = vec![0u8; self.dimension];
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);
        bytes
            .into_iter()
            .map(|b| f32::from(b) / 255.0 * 2.0 - 1.0)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        Ok(to_f16_embedding(self.vector(text), true))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hash"
    }

    fn model_name(&self) -> &str {
        "blake3"
    }
}
