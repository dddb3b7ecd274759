//! Embedders with known, hand-picked vectors for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use compass_embed::{EmbedError, EmbeddingProvider, f16};
use compass_retriever::retrieval::loaders::LoadedDocument;
use compass_retriever::{DocumentLoader, Error};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Two-dimensional embeddings chosen by keyword:
/// `alpha` → [1, 0], `beta` → [0, 1], `mixed` → [0.9, 0.1], anything else → [0.6, 0.8].
#[derive(Debug, Default)]
pub struct FixedEmbedder {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FixedEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sleeps for `delay` before every embedding.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        })
    }

    /// Number of `embed_text` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> [f32; 2] {
        if text.contains("poison") {
            [f32::NAN, f32::NAN]
        } else if text.contains("mixed") {
            [0.9, 0.1]
        } else if text.contains("alpha") {
            [1.0, 0.0]
        } else if text.contains("beta") {
            [0.0, 1.0]
        } else {
            [0.6, 0.8]
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed_text(&self, text: &str) -> compass_embed::Result<Vec<f16>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let vector = Self::vector_for(text);
        if vector.iter().any(|v| v.is_nan()) {
            return Err(EmbedError::unexpected_response("refusing to embed poison"));
        }
        Ok(vector.into_iter().map(f16::from_f32).collect())
    }

    fn embedding_dimension(&self) -> usize {
        2
    }

    fn provider_name(&self) -> &str {
        "fixed"
    }

    fn model_name(&self) -> &str {
        "keywords"
    }
}

/// A loader whose files can never be read, as if access were denied.
#[derive(Debug, Default)]
pub struct UnreadableLoader;

#[async_trait]
impl DocumentLoader for UnreadableLoader {
    fn kind(&self) -> &str {
        "locked"
    }

    async fn load(&self, path: &Path) -> compass_retriever::Result<LoadedDocument> {
        Err(Error::LoadFailure {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        })
    }
}
