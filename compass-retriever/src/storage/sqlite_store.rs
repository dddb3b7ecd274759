//! SQLite implementation of [`DocumentStore`]
//!
//! The database lives at `<vault>/.compass/compass.db`. The schema is applied
//! by the embedded migrations in `migrations/`, which run once per database
//! and are recorded in `_sqlx_migrations`, so reopening a store never
//! re-executes DDL.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE documents (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     path TEXT NOT NULL UNIQUE,       -- absolute, normalized source path
//!     content TEXT NOT NULL,
//!     content_hash TEXT NOT NULL,      -- blake3, hex
//!     metadata TEXT NOT NULL,          -- JSON DocumentMetadata
//!     chunk_profile TEXT NOT NULL,     -- chunker geometry + embedding model id
//!     ingested_at TIMESTAMP NOT NULL,
//!     updated_at TIMESTAMP NOT NULL
//! );
//!
//! CREATE TABLE chunks (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
//!     position INTEGER NOT NULL,       -- UNIQUE(document_id, position)
//!     char_start INTEGER NOT NULL,
//!     char_end INTEGER NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB,                  -- f16 vector (optional)
//!     embedding_dim INTEGER,
//!     model_id TEXT
//! );
//! ```
//!
//! ## SQLite Configuration
//!
//! - **WAL mode** with a busy timeout, so concurrent ingestion workers queue
//!   for the write lock instead of failing
//! - **Foreign keys** on, so deleting a document removes its chunks
//! - **Large page size** (64KB) for embedding blobs

use super::{
    ChunkId, Document, DocumentId, DocumentMetadata, DocumentStore, DocumentSummary,
    DocumentUpsert, EmbeddingModelRecord, NewChunk, NewDocument, StoreStats, StoredChunk,
    UpsertStatus,
};
use crate::error::{Error, Result};
use crate::vault::{COMPASS_DIR, DATABASE_FILE};
use async_trait::async_trait;
use chrono::Utc;
use half::f16;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const CHUNK_COLUMNS: &str = "c.id, c.document_id, d.path, c.position, c.char_start, c.char_end, \
     c.content, c.embedding, c.model_id";

/// SQLite-backed document store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    database_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) the store of the vault rooted at `vault_root`.
    pub async fn open(vault_root: &Path) -> Result<Self> {
        let compass_dir = vault_root.join(COMPASS_DIR);
        tokio::fs::create_dir_all(&compass_dir).await?;
        Self::open_file(&compass_dir.join(DATABASE_FILE)).await
    }

    /// Create the vault's database if missing and apply pending migrations.
    ///
    /// Safe to call any number of times. Returns the database path.
    pub async fn ensure_database(vault_root: &Path) -> Result<PathBuf> {
        let store = Self::open(vault_root).await?;
        let path = vault_root.join(COMPASS_DIR).join(DATABASE_FILE);
        store.close().await;
        Ok(path)
    }

    /// Open a store at an explicit database file path.
    pub async fn open_file(db_path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(Duration::from_secs(5))
                    .foreign_keys(true)
                    .create_if_missing(true)
                    .auto_vacuum(SqliteAutoVacuum::Full)
                    .page_size(1 << 16)
                    .optimize_on_close(true, 1 << 10),
            )
            .await?;
        debug!("Opened document store at {}", db_path.display());
        Self::with_pool(pool, Some(db_path.to_path_buf())).await
    }

    /// Opens a store backed by an in-memory database, for tests.
    pub async fn open_memory() -> Result<Self> {
        // Every in-memory connection is its own database, so pin the pool to one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
            .await?;
        Self::with_pool(pool, None).await
    }

    async fn with_pool(pool: SqlitePool, database_path: Option<PathBuf>) -> Result<Self> {
        MIGRATOR.run(&pool).await?;
        Ok(Self {
            pool,
            database_path,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Database file, or `None` for an in-memory store.
    pub fn database_path(&self) -> Option<&Path> {
        self.database_path.as_deref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Write the document row, drop its old chunks and insert the new ones atomically.
    async fn write_document(
        &self,
        document: &NewDocument,
        chunks: &[NewChunk],
    ) -> std::result::Result<DocumentId, sqlx::Error> {
        let metadata = serde_json::to_string(&document.metadata)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        // First statement is a write so the transaction takes the write lock up front
        let id: DocumentId = sqlx::query_scalar(
            r#"
            INSERT INTO documents (path, content, content_hash, metadata, chunk_profile, ingested_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(path) DO UPDATE SET
                content = excluded.content,
                content_hash = excluded.content_hash,
                metadata = excluded.metadata,
                chunk_profile = excluded.chunk_profile,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&document.path)
        .bind(&document.content)
        .bind(&document.content_hash)
        .bind(&metadata)
        .bind(&document.chunk_profile)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        insert_chunk_rows(&mut tx, id, chunks).await?;
        tx.commit().await?;
        Ok(id)
    }
}

async fn insert_chunk_rows(
    tx: &mut Transaction<'_, Sqlite>,
    document_id: DocumentId,
    chunks: &[NewChunk],
) -> std::result::Result<Vec<ChunkId>, sqlx::Error> {
    let mut ids = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let embedding_bytes = chunk
            .embedding
            .as_deref()
            .map(bytemuck::cast_slice::<f16, u8>);
        let embedding_dim = chunk.embedding.as_ref().map(|e| e.len() as i64);

        let id: ChunkId = sqlx::query_scalar(
            r#"
            INSERT INTO chunks (document_id, position, char_start, char_end, content, embedding, embedding_dim, model_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING id
            "#,
        )
        .bind(document_id)
        .bind(chunk.position as i64)
        .bind(chunk.start as i64)
        .bind(chunk.end as i64)
        .bind(&chunk.content)
        .bind(embedding_bytes)
        .bind(embedding_dim)
        .bind(chunk.model_id.as_deref())
        .fetch_one(&mut **tx)
        .await?;
        ids.push(id);
    }
    Ok(ids)
}

fn decode_embedding(bytes: Option<Vec<u8>>) -> Option<Vec<f16>> {
    // Blob buffers carry no alignment guarantee, so copy rather than cast in place
    bytes.map(|b| bytemuck::pod_collect_to_vec::<u8, f16>(&b))
}

fn chunk_from_row(row: &SqliteRow) -> std::result::Result<StoredChunk, sqlx::Error> {
    Ok(StoredChunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        path: row.try_get("path")?,
        position: row.try_get::<i64, _>("position")? as usize,
        start: row.try_get::<i64, _>("char_start")? as usize,
        end: row.try_get::<i64, _>("char_end")? as usize,
        content: row.try_get("content")?,
        embedding: decode_embedding(row.try_get("embedding")?),
        model_id: row.try_get("model_id")?,
    })
}

fn document_from_row(row: &SqliteRow) -> std::result::Result<Document, sqlx::Error> {
    let metadata: String = row.try_get("metadata")?;
    let metadata: DocumentMetadata =
        serde_json::from_str(&metadata).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(Document {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        content: row.try_get("content")?,
        content_hash: row.try_get("content_hash")?,
        metadata,
        chunk_profile: row.try_get("chunk_profile")?,
        ingested_at: row.try_get("ingested_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn model_from_row(row: &SqliteRow) -> std::result::Result<EmbeddingModelRecord, sqlx::Error> {
    Ok(EmbeddingModelRecord {
        model_id: row.try_get("model_id")?,
        provider: row.try_get("provider")?,
        model_name: row.try_get("model_name")?,
        dimension: row.try_get::<i64, _>("dimension")? as usize,
        normalized: row.try_get("normalized")?,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert_document(&self, document: &NewDocument) -> Result<DocumentUpsert> {
        self.replace_document(document, &[]).await
    }

    async fn insert_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<ChunkId>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Error::StoreTransactionFailure)?;

        let exists: Option<DocumentId> = sqlx::query_scalar("SELECT id FROM documents WHERE id = ?1")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::ForeignKeyViolation { document_id });
        }

        let ids = insert_chunk_rows(&mut tx, document_id, chunks)
            .await
            .map_err(|e| {
                if e.as_database_error()
                    .is_some_and(|db| db.is_foreign_key_violation())
                {
                    Error::ForeignKeyViolation { document_id }
                } else {
                    Error::StoreTransactionFailure(e)
                }
            })?;
        tx.commit().await.map_err(Error::StoreTransactionFailure)?;
        Ok(ids)
    }

    async fn replace_document(
        &self,
        document: &NewDocument,
        chunks: &[NewChunk],
    ) -> Result<DocumentUpsert> {
        let existing = self.get_document(&document.path).await?;
        if let Some(existing) = &existing
            && existing.is_unchanged(document)
        {
            debug!("Document unchanged: {}", document.path);
            return Ok(DocumentUpsert {
                id: existing.id,
                status: UpsertStatus::Unchanged,
            });
        }

        let status = if existing.is_some() {
            UpsertStatus::Replaced
        } else {
            UpsertStatus::Created
        };
        let id = self
            .write_document(document, chunks)
            .await
            .map_err(Error::StoreTransactionFailure)?;

        debug!(
            "Stored {} with {} chunks ({:?})",
            document.path,
            chunks.len(),
            status
        );
        Ok(DocumentUpsert { id, status })
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, path, content, content_hash, metadata, chunk_profile, ingested_at, updated_at \
             FROM documents WHERE path = ?1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(document_from_row).transpose()?)
    }

    async fn delete_document(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE path = ?1")
            .bind(path)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Removed document {}", path);
        }
        Ok(deleted)
    }

    async fn document_chunks(&self, document_id: DocumentId) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE c.document_id = ?1 ORDER BY c.position"
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(chunk_from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.path, d.content_hash, d.chunk_profile, d.updated_at,
                   COUNT(c.id) AS chunk_count,
                   COUNT(c.embedding) AS embedded_chunks
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.id
            ORDER BY d.path
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            documents.push(DocumentSummary {
                id: row.try_get("id")?,
                path: row.try_get("path")?,
                content_hash: row.try_get("content_hash")?,
                chunk_profile: row.try_get("chunk_profile")?,
                chunk_count: row.try_get::<i64, _>("chunk_count")? as usize,
                embedded_chunks: row.try_get::<i64, _>("embedded_chunks")? as usize,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(documents)
    }

    async fn all_chunks_with_vectors(&self) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE c.embedding IS NOT NULL ORDER BY d.path, c.position"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(chunk_from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn register_embedding_model(&self, model: &EmbeddingModelRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_models (model_id, provider, model_name, dimension, normalized)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(model_id) DO UPDATE SET
                provider = excluded.provider,
                model_name = excluded.model_name,
                dimension = excluded.dimension,
                normalized = excluded.normalized
            "#,
        )
        .bind(&model.model_id)
        .bind(&model.provider)
        .bind(&model.model_name)
        .bind(model.dimension as i64)
        .bind(model.normalized)
        .execute(&self.pool)
        .await?;
        debug!("Registered embedding model {}", model.model_id);
        Ok(())
    }

    async fn embedding_dimensions(&self) -> Result<Vec<usize>> {
        let dims: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT embedding_dim FROM chunks \
             WHERE embedding IS NOT NULL ORDER BY embedding_dim",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(dims.into_iter().map(|d| d as usize).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embedded_chunks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        let models = sqlx::query(
            "SELECT model_id, provider, model_name, dimension, normalized \
             FROM embedding_models ORDER BY model_id",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(model_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            documents: documents as usize,
            chunks: chunks as usize,
            embedded_chunks: embedded_chunks as usize,
            embedding_dimensions: self.embedding_dimensions().await?,
            models,
        })
    }
}
