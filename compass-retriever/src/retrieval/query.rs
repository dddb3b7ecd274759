//! Query entry point: retrieve, rerank, then assemble cited context.

use super::rerank::Reranker;
use super::retriever::{Retriever, ScoredChunk};
use crate::error::Result;
use compass_context::{format_context, generate_citations};
use serde::Serialize;
use tracing::{debug, warn};

/// Candidates fetched per requested chunk when the reranker can reorder.
const RERANK_POOL_FACTOR: usize = 3;

/// One chunk that went into the context, numbered as in the context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitedChunk {
    /// 1-based, matches `[Document i - ...]` and `[i]`
    pub index: usize,
    pub path: String,
    pub position: usize,
    pub score: f32,
    pub content: String,
}

/// Everything a completion call needs to answer with citations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub context: String,
    pub citations: String,
    /// Number of chunks in `context`
    pub chunks_used: usize,
    pub chunks: Vec<CitedChunk>,
    /// Why the answer is empty, when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryAnswer {
    fn from_chunks(chunks: &[ScoredChunk]) -> Self {
        Self {
            context: format_context(chunks),
            citations: generate_citations(chunks),
            chunks_used: chunks.len(),
            chunks: chunks
                .iter()
                .enumerate()
                .map(|(i, c)| CitedChunk {
                    index: i + 1,
                    path: c.chunk.path.clone(),
                    position: c.chunk.position,
                    score: c.score,
                    content: c.chunk.content.clone(),
                })
                .collect(),
            error: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks_used == 0
    }
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    retriever: Retriever,
    reranker: Reranker,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(retriever: Retriever, reranker: Reranker, top_k: usize) -> Self {
        Self {
            retriever,
            reranker,
            top_k,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Ranked chunks for `query`, `top_k` overriding the configured count.
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<ScoredChunk>> {
        let top_k = top_k.unwrap_or(self.top_k);
        let pool = if self.reranker.reorders() {
            top_k.saturating_mul(RERANK_POOL_FACTOR)
        } else {
            top_k
        };

        let candidates = self.retriever.retrieve(query, pool).await?;
        debug!(
            "Reranking {} candidates with {}",
            candidates.len(),
            self.reranker
        );
        Ok(self.reranker.rerank(query, candidates, top_k))
    }

    /// Answer `query` with context and citations.
    ///
    /// Never fails: an error yields an empty answer whose `error` says why.
    pub async fn query(&self, query: &str, top_k: Option<usize>) -> QueryAnswer {
        match self.search(query, top_k).await {
            Ok(chunks) => QueryAnswer::from_chunks(&chunks),
            Err(e) => {
                warn!("Query failed: {}", e);
                QueryAnswer::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite_store::SqliteStore;
    use crate::storage::{DocumentMetadata, DocumentStore, NewChunk, NewDocument};
    use compass_embed::{EmbeddingProvider, HashEmbedder};
    use std::sync::Arc;

    async fn seeded_engine(reranker: Reranker) -> anyhow::Result<QueryEngine> {
        let store = Arc::new(SqliteStore::open_memory().await?);
        let embedder = Arc::new(HashEmbedder::new(16)?);

        for (path, texts) in [
            ("/v/a.md", vec!["apples and pears", "bananas"]),
            ("/v/b.md", vec!["the budget review"]),
        ] {
            let mut chunks = Vec::new();
            for (position, text) in texts.iter().enumerate() {
                chunks.push(
                    NewChunk {
                        position,
                        start: 0,
                        end: text.len(),
                        content: text.to_string(),
                        embedding: None,
                        model_id: None,
                    }
                    .with_embedding(embedder.embed_text(text).await?, embedder.model_id()),
                );
            }
            let document = NewDocument::new(path, texts.concat(), DocumentMetadata::default(), "p");
            store.replace_document(&document, &chunks).await?;
        }

        let retriever = Retriever::new(store, embedder).await?;
        Ok(QueryEngine::new(retriever, reranker, 2))
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first_and_aligns() -> anyhow::Result<()> {
        let engine = seeded_engine(Reranker::Passthrough).await?;
        let answer = engine.query("the budget review", None).await;

        assert!(answer.error.is_none());
        assert_eq!(answer.chunks_used, 2);
        assert_eq!(answer.chunks.len(), answer.chunks_used);
        assert_eq!(answer.chunks[0].path, "/v/b.md");
        assert!((answer.chunks[0].score - 1.0).abs() < 1e-2);
        assert!(answer.context.starts_with("[Document 1 - /v/b.md]\nthe budget review"));
        assert!(answer.citations.starts_with("Sources:\n[1] /v/b.md\n[2] "));
        assert_eq!(answer.chunks[1].index, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_top_k_override() -> anyhow::Result<()> {
        let engine = seeded_engine(Reranker::TermOverlap).await?;

        let answer = engine.query("bananas", Some(1)).await;
        assert_eq!(answer.chunks_used, 1);
        assert_eq!(answer.chunks[0].content, "bananas");

        let answer = engine.query("bananas", Some(10)).await;
        assert_eq!(answer.chunks_used, 3);

        let answer = engine.query("bananas", Some(0)).await;
        assert!(answer.is_empty());
        assert_eq!(answer.context, "");
        assert_eq!(answer.citations, "");
        assert!(answer.error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() -> anyhow::Result<()> {
        let engine = seeded_engine(Reranker::Passthrough).await?;
        let narrow = Retriever::new(
            engine.retriever().store().clone(),
            Arc::new(HashEmbedder::new(4)?),
        )
        .await?;
        let engine = QueryEngine::new(narrow, Reranker::Passthrough, 3);

        let answer = engine.query("anything", None).await;
        assert!(answer.is_empty());
        assert_eq!(answer.chunks_used, 0);
        assert_eq!(answer.context, "");
        let error = answer.error.unwrap();
        assert!(error.contains("dimension"), "{error}");
        Ok(())
    }
}
