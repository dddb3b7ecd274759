//! Storage abstraction for documents, chunks and their embeddings
//!
//! ## Key Components
//!
//! - **DocumentStore**: every read and write the pipeline and retriever need
//! - **Data Types**: documents, chunks and embedding model records
//!
//! ```text
//! IngestionPipeline ─┐
//!                    ├─ DocumentStore ── SqliteStore (concrete implementation)
//! Retriever ─────────┘
//! ```
//!
//! A document is identified by its absolute, normalized path. Writes that
//! change a document replace all of its chunks atomically; a document whose
//! content hash and chunk profile are unchanged is never rewritten.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use half::f16;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod sqlite_store;

/// Database ID for a document.
pub type DocumentId = i64;

/// Database ID for a chunk.
pub type ChunkId = i64;

/// Blake3 digest of `content`, hex encoded.
pub fn content_hash(content: &str) -> String {
    hex::encode(blake3::hash(content.as_bytes()).as_bytes())
}

/// Format-specific document metadata, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path the document was loaded from
    pub source: String,
    /// Loader that produced the text, e.g. `markdown`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A document as handed to the store for writing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub path: String,
    pub content: String,
    pub content_hash: String,
    pub metadata: DocumentMetadata,
    /// Identifies how the chunks were produced; see [`chunk_profile`]
    pub chunk_profile: String,
}

impl NewDocument {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        metadata: DocumentMetadata,
        chunk_profile: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            content_hash: content_hash(&content),
            content,
            metadata,
            chunk_profile: chunk_profile.into(),
        }
    }
}

/// Combine chunker geometry and embedding model into one comparable string.
///
/// Re-chunking with different settings or re-embedding with another model
/// changes this value, which the store treats like a content change.
pub fn chunk_profile(chunker_profile: &str, model_id: &str) -> String {
    format!("{chunker_profile}:{model_id}")
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub path: String,
    pub content: String,
    pub content_hash: String,
    pub metadata: DocumentMetadata,
    pub chunk_profile: String,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Whether writing `candidate` would change nothing.
    pub fn is_unchanged(&self, candidate: &NewDocument) -> bool {
        self.content_hash == candidate.content_hash && self.chunk_profile == candidate.chunk_profile
    }
}

/// Per-document overview without content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub path: String,
    pub content_hash: String,
    pub chunk_profile: String,
    pub chunk_count: usize,
    pub embedded_chunks: usize,
    pub updated_at: DateTime<Utc>,
}

/// A chunk as handed to the store for writing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub position: usize,
    pub start: usize,
    pub end: usize,
    pub content: String,
    pub embedding: Option<Vec<f16>>,
    pub model_id: Option<String>,
}

impl NewChunk {
    pub fn from_text(chunk: compass_context::TextChunk) -> Self {
        Self {
            position: chunk.position,
            start: chunk.start,
            end: chunk.end,
            content: chunk.content,
            embedding: None,
            model_id: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f16>, model_id: impl Into<String>) -> Self {
        self.embedding = Some(embedding);
        self.model_id = Some(model_id.into());
        self
    }
}

/// A stored chunk, joined with its document's path.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub path: String,
    pub position: usize,
    pub start: usize,
    pub end: usize,
    pub content: String,
    pub embedding: Option<Vec<f16>>,
    pub model_id: Option<String>,
}

/// What an upsert did to the document row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Replaced,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentUpsert {
    pub id: DocumentId,
    pub status: UpsertStatus,
}

/// An embedding model known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelRecord {
    /// `provider:model:dimension`
    pub model_id: String,
    pub provider: String,
    pub model_name: String,
    pub dimension: usize,
    pub normalized: bool,
}

impl EmbeddingModelRecord {
    pub fn from_provider(provider: &dyn compass_embed::EmbeddingProvider) -> Self {
        Self {
            model_id: provider.model_id(),
            provider: provider.provider_name().to_string(),
            model_name: provider.model_name().to_string(),
            dimension: provider.embedding_dimension(),
            normalized: provider.is_normalized(),
        }
    }
}

/// Whole-store counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
    pub embedding_dimensions: Vec<usize>,
    pub models: Vec<EmbeddingModelRecord>,
}

/// Document, chunk and embedding persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or update a document row.
    ///
    /// An unchanged document (same hash and chunk profile) keeps its chunks.
    /// Otherwise its content, hash and metadata are replaced and all of its
    /// prior chunks are deleted, in one transaction.
    async fn upsert_document(&self, document: &NewDocument) -> Result<DocumentUpsert>;

    /// Bulk insert chunks for an existing document in one transaction.
    async fn insert_chunks(&self, document_id: DocumentId, chunks: &[NewChunk])
    -> Result<Vec<ChunkId>>;

    /// Upsert a document and write its chunks in a single transaction.
    ///
    /// A failure rolls back and leaves the previous document and chunks intact.
    async fn replace_document(
        &self,
        document: &NewDocument,
        chunks: &[NewChunk],
    ) -> Result<DocumentUpsert>;

    async fn get_document(&self, path: &str) -> Result<Option<Document>>;

    /// Remove a document and, by cascade, its chunks. Returns whether it existed.
    async fn delete_document(&self, path: &str) -> Result<bool>;

    /// Chunks of one document in position order.
    async fn document_chunks(&self, document_id: DocumentId) -> Result<Vec<StoredChunk>>;

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// Every chunk that carries an embedding, ordered by (path, position).
    async fn all_chunks_with_vectors(&self) -> Result<Vec<StoredChunk>>;

    async fn register_embedding_model(&self, model: &EmbeddingModelRecord) -> Result<()>;

    /// Distinct widths of the stored embeddings, ascending.
    async fn embedding_dimensions(&self) -> Result<Vec<usize>>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_hex_blake3() {
        let hash = content_hash("hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hex::encode(blake3::hash(b"hello").as_bytes()));
        assert_ne!(hash, content_hash("hello!"));
    }

    #[test]
    fn test_unchanged_requires_hash_and_profile() {
        let candidate = NewDocument::new("/v/a.md", "alpha", DocumentMetadata::default(), "p1");
        let stored = Document {
            id: 1,
            path: candidate.path.clone(),
            content: candidate.content.clone(),
            content_hash: candidate.content_hash.clone(),
            metadata: DocumentMetadata::default(),
            chunk_profile: "p1".to_string(),
            ingested_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(stored.is_unchanged(&candidate));

        let reprofiled = NewDocument {
            chunk_profile: "p2".to_string(),
            ..candidate.clone()
        };
        assert!(!stored.is_unchanged(&reprofiled));

        let edited = NewDocument::new("/v/a.md", "alpha beta", DocumentMetadata::default(), "p1");
        assert!(!stored.is_unchanged(&edited));
    }

    #[test]
    fn test_metadata_json_omits_empty_fields() {
        let metadata = DocumentMetadata {
            source: "/v/a.txt".to_string(),
            kind: "text".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"source":"/v/a.txt","kind":"text"}"#);
    }
}
