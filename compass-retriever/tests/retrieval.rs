//! Retrieval, reranking and context assembly over a populated store.

mod common;

use anyhow::Result;
use common::FixedEmbedder;
use compass_embed::{EmbeddingProvider, HashEmbedder};
use compass_retriever::storage::{DocumentMetadata, NewChunk, NewDocument};
use compass_retriever::{
    DocumentStore, Error, IngestionConfig, IngestionPipeline, LoaderRegistry, QueryEngine,
    Reranker, Retriever, SqliteStore,
};
use std::sync::Arc;
use tempfile::tempdir;

/// A store holding `alpha.md` → [1, 0], `beta.md` → [0, 1] and `mixed.md` → [0.9, 0.1].
async fn populated_store() -> Result<(tempfile::TempDir, SqliteStore)> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("alpha.md"), "alpha")?;
    std::fs::write(dir.path().join("beta.md"), "beta")?;
    std::fs::write(dir.path().join("mixed.md"), "mixed")?;

    let store = SqliteStore::open_memory().await?;
    let pipeline = IngestionPipeline::new(
        IngestionConfig::default(),
        LoaderRegistry::default(),
        FixedEmbedder::new(),
        Arc::new(store.clone()),
    )
    .await?;
    let report = pipeline.ingest(dir.path()).await;
    assert_eq!(report.succeeded.len(), 3);
    Ok((dir, store))
}

fn file_names(chunks: &[compass_retriever::ScoredChunk]) -> Vec<String> {
    chunks
        .iter()
        .map(|c| {
            std::path::Path::new(&c.chunk.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect()
}

#[tokio::test]
async fn test_nearest_vectors_rank_first() -> Result<()> {
    let (_dir, store) = populated_store().await?;
    let retriever = Retriever::new(Arc::new(store), FixedEmbedder::new()).await?;

    let results = retriever.retrieve("alpha", 2).await?;
    assert_eq!(file_names(&results), vec!["alpha.md", "mixed.md"]);
    assert!(results[0].score >= results[1].score);
    assert!((results[0].score - 1.0).abs() < 1e-3);

    let results = retriever.retrieve("beta", 10).await?;
    assert_eq!(file_names(&results), vec!["beta.md", "mixed.md", "alpha.md"]);
    Ok(())
}

#[tokio::test]
async fn test_repeated_queries_are_deterministic() -> Result<()> {
    let dir = tempdir()?;
    for name in ["c.md", "a.md", "b.md"] {
        std::fs::write(dir.path().join(name), "alpha")?;
    }
    let store = SqliteStore::open_memory().await?;
    IngestionPipeline::new(
        IngestionConfig::default(),
        LoaderRegistry::default(),
        FixedEmbedder::new(),
        Arc::new(store.clone()),
    )
    .await?
    .ingest(dir.path())
    .await;

    let retriever = Retriever::new(Arc::new(store), FixedEmbedder::new()).await?;
    let first = retriever.retrieve("alpha", 3).await?;
    let second = retriever.retrieve("alpha", 3).await?;
    assert_eq!(first, second);
    // Equal scores fall back to path order
    assert_eq!(file_names(&first), vec!["a.md", "b.md", "c.md"]);
    Ok(())
}

#[tokio::test]
async fn test_unembedded_chunks_are_not_candidates() -> Result<()> {
    let store = SqliteStore::open_memory().await?;
    let chunk = NewChunk {
        position: 0,
        start: 0,
        end: 5,
        content: "alpha".to_string(),
        embedding: None,
        model_id: None,
    };
    store
        .replace_document(
            &NewDocument::new("/v/raw.md", "alpha", DocumentMetadata::default(), "p"),
            &[chunk],
        )
        .await?;

    let embedder = FixedEmbedder::new();
    let retriever = Retriever::new(Arc::new(store), embedder.clone()).await?;
    assert!(retriever.retrieve("alpha", 5).await?.is_empty());
    assert_eq!(embedder.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_zero_top_k_skips_the_embedder() -> Result<()> {
    let (_dir, store) = populated_store().await?;
    let embedder = FixedEmbedder::new();
    let retriever = Retriever::new(Arc::new(store), embedder.clone()).await?;

    assert!(retriever.retrieve("alpha", 0).await?.is_empty());
    assert_eq!(embedder.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_query_with_other_dimension_fails() -> Result<()> {
    let (_dir, store) = populated_store().await?;
    let retriever = Retriever::new(Arc::new(store), Arc::new(HashEmbedder::new(4)?)).await?;

    match retriever.retrieve("alpha", 3).await {
        Err(Error::EmbeddingDimensionMismatch { query, stored }) => {
            assert_eq!(query, 4);
            assert_eq!(stored, vec![2]);
        }
        other => panic!("expected a dimension mismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_context_and_citations_line_up() -> Result<()> {
    let (_dir, store) = populated_store().await?;
    let retriever = Retriever::new(Arc::new(store), FixedEmbedder::new()).await?;
    let engine = QueryEngine::new(retriever, Reranker::Passthrough, 2);

    let answer = engine.query("alpha", None).await;
    assert!(answer.error.is_none());
    assert_eq!(answer.chunks_used, 2);
    assert_eq!(answer.chunks.len(), 2);

    for cited in &answer.chunks {
        let block = format!("[Document {} - {}]\n{}", cited.index, cited.path, cited.content);
        assert!(answer.context.contains(&block), "missing {block:?}");
        let line = format!("[{}] {}", cited.index, cited.path);
        assert!(answer.citations.lines().any(|l| l == line), "missing {line:?}");
    }
    assert!(answer.citations.starts_with("Sources:\n"));
    assert_eq!(answer.context.matches("[Document ").count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_empty_store_gives_empty_answer() -> Result<()> {
    let store = SqliteStore::open_memory().await?;
    let embedder = Arc::new(HashEmbedder::new(8)?);
    assert_eq!(embedder.embedding_dimension(), 8);
    let retriever = Retriever::new(Arc::new(store), embedder).await?;
    let engine = QueryEngine::new(retriever, Reranker::TermOverlap, 5);

    let answer = engine.query("anything at all", None).await;
    assert!(answer.error.is_none());
    assert!(answer.is_empty());
    assert_eq!(answer.chunks_used, 0);
    assert_eq!(answer.context, "");
    assert_eq!(answer.citations, "");
    Ok(())
}
