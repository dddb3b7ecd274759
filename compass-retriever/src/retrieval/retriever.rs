//! Cosine-similarity retrieval over stored chunk embeddings.
//!
//! Every stored vector written by the query's embedding model is scored;
//! there is no approximate index. Ordering is total and deterministic: score
//! descending, then document path and chunk position ascending.

use crate::error::{Error, Result};
use crate::storage::{DocumentStore, EmbeddingModelRecord, StoredChunk};
use compass_context::Citable;
use compass_embed::EmbeddingProvider;
use half::f16;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// A retrieved chunk and its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

impl Citable for ScoredChunk {
    fn source(&self) -> &str {
        &self.chunk.path
    }

    fn content(&self) -> &str {
        &self.chunk.content
    }
}

/// Serializable view of a [`ScoredChunk`] without its vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub path: String,
    pub position: usize,
    pub start: usize,
    pub end: usize,
    pub score: f32,
    pub content: String,
}

impl From<&ScoredChunk> for ChunkHit {
    fn from(scored: &ScoredChunk) -> Self {
        Self {
            path: scored.chunk.path.clone(),
            position: scored.chunk.position,
            start: scored.chunk.start,
            end: scored.chunk.end,
            score: scored.score,
            content: scored.chunk.content.clone(),
        }
    }
}

/// Cosine similarity of two equally sized vectors, accumulated in f32.
///
/// Vectors of different length, or with zero norm, score 0.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        let x = x.to_f32();
        let y = y.to_f32();
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

fn rank(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.path.cmp(&b.chunk.path))
        .then_with(|| a.chunk.position.cmp(&b.chunk.position))
}

/// Embeds queries and ranks stored chunks against them.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("model_id", &self.embedder.model_id())
            .finish()
    }
}

impl Retriever {
    /// Create a retriever and record the query embedder's model in the store.
    pub async fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        store
            .register_embedding_model(&EmbeddingModelRecord::from_provider(embedder.as_ref()))
            .await?;
        Ok(Self { store, embedder })
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The `top_k` stored chunks most similar to `query`.
    ///
    /// `top_k == 0` returns nothing without calling the embedder. Chunks
    /// without an embedding, with one of a different width, or written by a
    /// different model are never candidates. If vectors are stored but none
    /// has the query's width the call fails with
    /// [`Error::EmbeddingDimensionMismatch`].
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_text(query).await?;
        let stored = self.store.all_chunks_with_vectors().await?;
        let total = stored.len();

        let model_id = self.embedder.model_id();
        let mut same_width = 0;
        let mut scored: Vec<ScoredChunk> = stored
            .into_iter()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_deref()?;
                if embedding.len() != query_vector.len() {
                    return None;
                }
                same_width += 1;
                // Rows without a recorded model are compared on width alone
                if chunk.model_id.as_deref().is_some_and(|m| m != model_id) {
                    return None;
                }
                let score = cosine_similarity(&query_vector, embedding);
                Some(ScoredChunk { chunk, score })
            })
            .collect();

        if total > 0 && same_width == 0 {
            return Err(Error::EmbeddingDimensionMismatch {
                query: query_vector.len(),
                stored: self.store.embedding_dimensions().await?,
            });
        }
        if same_width > scored.len() {
            warn!(
                "Ignoring {} chunks embedded by a model other than {}",
                same_width - scored.len(),
                model_id
            );
        }

        scored.sort_by(rank);
        scored.truncate(top_k);

        debug!(
            "Retrieved {} of {} candidate chunks for query ({} chars)",
            scored.len(),
            total,
            query.chars().count()
        );
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f32]) -> Vec<f16> {
        values.iter().copied().map(f16::from_f32).collect()
    }

    fn scored(path: &str, position: usize, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: StoredChunk {
                id: 0,
                document_id: 0,
                path: path.to_string(),
                position,
                start: 0,
                end: 0,
                content: String::new(),
                embedding: None,
                model_id: None,
            },
            score,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&v(&[1.0, 0.0]), &v(&[1.0, 0.0])) - 1.0).abs() < 1e-3);
        assert!(cosine_similarity(&v(&[1.0, 0.0]), &v(&[0.0, 1.0])).abs() < 1e-3);
        assert!((cosine_similarity(&v(&[1.0, 0.0]), &v(&[-1.0, 0.0])) + 1.0).abs() < 1e-3);
        // Magnitude does not matter
        assert!((cosine_similarity(&v(&[3.0, 4.0]), &v(&[0.6, 0.8])) - 1.0).abs() < 1e-3);

        assert_eq!(cosine_similarity(&v(&[1.0]), &v(&[1.0, 0.0])), 0.0);
        assert_eq!(cosine_similarity(&v(&[0.0, 0.0]), &v(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_rank_breaks_ties_by_path_then_position() {
        let mut chunks = vec![
            scored("b.md", 0, 0.5),
            scored("a.md", 1, 0.5),
            scored("c.md", 0, 0.9),
            scored("a.md", 0, 0.5),
        ];
        chunks.sort_by(rank);
        let keys: Vec<_> = chunks
            .iter()
            .map(|c| (c.chunk.path.as_str(), c.chunk.position))
            .collect();
        assert_eq!(
            keys,
            vec![("c.md", 0), ("a.md", 0), ("a.md", 1), ("b.md", 0)]
        );
    }

    #[tokio::test]
    async fn test_other_model_vectors_are_not_candidates() -> anyhow::Result<()> {
        use crate::storage::sqlite_store::SqliteStore;
        use crate::storage::{DocumentMetadata, NewChunk, NewDocument};
        use compass_embed::HashEmbedder;

        let store = Arc::new(SqliteStore::open_memory().await?);
        let embedder = Arc::new(HashEmbedder::new(8)?);
        let vector = embedder.embed_text("tomatoes").await?;

        for (path, model_id) in [
            ("/v/current.md", embedder.model_id()),
            ("/v/stale.md", "fastembed:other-model:8".to_string()),
        ] {
            let chunk = NewChunk {
                position: 0,
                start: 0,
                end: 8,
                content: "tomatoes".to_string(),
                embedding: None,
                model_id: None,
            }
            .with_embedding(vector.clone(), model_id);
            let document = NewDocument::new(path, "tomatoes", DocumentMetadata::default(), "p");
            store.replace_document(&document, &[chunk]).await?;
        }

        let retriever = Retriever::new(store.clone(), embedder).await?;
        let results = retriever.retrieve("tomatoes", 5).await?;
        let paths: Vec<_> = results.iter().map(|c| c.chunk.path.as_str()).collect();
        assert_eq!(paths, vec!["/v/current.md"]);

        // Same width, different model only: nothing to compare, but not an error
        store.delete_document("/v/current.md").await?;
        assert!(retriever.retrieve("tomatoes", 5).await?.is_empty());
        Ok(())
    }

    #[test]
    fn test_citable_uses_path_and_content() {
        let mut chunk = scored("notes/a.md", 0, 1.0);
        chunk.chunk.content = "Alpha".to_string();
        assert_eq!(
            compass_context::format_context(&[chunk]),
            "[Document 1 - notes/a.md]\nAlpha"
        );
    }
}
