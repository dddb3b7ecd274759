//! Ingestion pipeline: files in, embedded chunks in the store out.
//!
//! ## Pipeline Flow
//!
//! ```text
//! path ─ discover ─┬─ file ─ LoaderRegistry ─ TextChunker ─ EmbeddingProvider ─ DocumentStore
//!                  ├─ file ─ ...                        (max_workers at a time)
//!                  └─ file ─ ...
//! ```
//!
//! Each file moves through `Discovered → Loaded → Chunked → Embedded → Stored`
//! on its own. A file either ends up stored, unchanged, skipped (no loader for
//! its extension) or failed at one of those stages; one file's failure never
//! stops the others. A file whose content hash and chunk profile match what
//! is stored is recognised before chunking and costs no embedding call and
//! no write.

use super::loaders::{DocumentLoader, LoaderRegistry};
use crate::config::CompassConfig;
use crate::error::{Error, Result};
use crate::storage::{
    DocumentStore, EmbeddingModelRecord, NewChunk, NewDocument, UpsertStatus, chunk_profile,
};
use crate::vault::COMPASS_DIR;
use compass_context::{TextChunk, TextChunker};
use compass_embed::{EmbedError, EmbeddingProvider};
use futures::StreamExt;
use half::f16;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Chunking and concurrency settings for an [`IngestionPipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    /// Window width in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive windows
    pub chunk_overlap: usize,
    /// Files processed concurrently
    pub max_workers: usize,
    /// Limit on a single file's embedding call
    pub embed_timeout: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            max_workers: 4,
            embed_timeout: Duration::from_secs(60),
        }
    }
}

impl IngestionConfig {
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_chunk_overlap(mut self, overlap: usize) -> Self {
        self.chunk_overlap = overlap;
        self
    }

    /// Set the number of files processed at the same time.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Check the settings and build the chunker they describe.
    pub fn validate(&self) -> Result<TextChunker> {
        let chunker = TextChunker::new(self.chunk_size, self.chunk_overlap)?;
        if self.max_workers == 0 {
            return Err(Error::InvalidConfiguration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.embed_timeout.is_zero() {
            return Err(Error::InvalidConfiguration(
                "embed timeout must be greater than zero".to_string(),
            ));
        }
        Ok(chunker)
    }
}

impl From<&CompassConfig> for IngestionConfig {
    fn from(config: &CompassConfig) -> Self {
        let rag = config.rag();
        Self {
            chunk_size: rag.chunk_size,
            chunk_overlap: rag.chunk_overlap,
            max_workers: rag.max_workers,
            embed_timeout: config.embed_timeout(),
        }
    }
}

/// Per-file progress. A failure is tagged with the stage it could not reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    Discovered,
    Loaded,
    Chunked,
    Embedded,
    Stored,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discovered => "discovery",
            Self::Loaded => "loading",
            Self::Chunked => "chunking",
            Self::Embedded => "embedding",
            Self::Stored => "storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPath {
    pub path: PathBuf,
    pub stage: IngestStage,
    pub reason: String,
}

impl FailedPath {
    fn new(path: impl Into<PathBuf>, stage: IngestStage, reason: impl std::fmt::Display) -> Self {
        Self {
            path: path.into(),
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Terminal state of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Stored { path: PathBuf, chunks: usize },
    Unchanged { path: PathBuf },
    Skipped { path: PathBuf },
    Failed(FailedPath),
}

/// What one ingestion run did, with every list sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Files written to the store
    pub succeeded: Vec<PathBuf>,
    /// Files already stored with the same content and chunk profile
    pub unchanged: Vec<PathBuf>,
    /// Files with no registered loader
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<FailedPath>,
    /// Chunks written across all succeeded files
    pub chunks_written: usize,
}

/// JSON-friendly digest of an [`IngestReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: Vec<FailureSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub path: String,
    pub reason: String,
}

impl IngestReport {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Stored { path, chunks } => {
                self.succeeded.push(path);
                self.chunks_written += chunks;
            }
            FileOutcome::Unchanged { path } => self.unchanged.push(path),
            FileOutcome::Skipped { path } => self.skipped.push(path),
            FileOutcome::Failed(failed) => self.failed.push(failed),
        }
    }

    fn sort(&mut self) {
        self.succeeded.sort();
        self.unchanged.sort();
        self.skipped.sort();
        self.failed.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// Files that were stored or found unchanged.
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.unchanged.len()
    }

    pub fn summary(&self) -> IngestSummary {
        IngestSummary {
            processed: self.processed(),
            skipped: self.skipped.len(),
            failed: self
                .failed
                .iter()
                .map(|f| FailureSummary {
                    path: f.path.display().to_string(),
                    reason: format!("{} failed: {}", f.stage, f.reason),
                })
                .collect(),
        }
    }
}

type StageError = (IngestStage, Error);

/// Loads, chunks, embeds and stores documents.
pub struct IngestionPipeline {
    config: IngestionConfig,
    chunker: TextChunker,
    loaders: LoaderRegistry,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn DocumentStore>,
    model_id: String,
    chunk_profile: String,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("config", &self.config)
            .field("loaders", &self.loaders)
            .field("model_id", &self.model_id)
            .finish()
    }
}

impl IngestionPipeline {
    /// Validate `config`, then register the embedder's model with the store.
    ///
    /// Invalid settings fail with [`Error::InvalidConfiguration`] before the
    /// store is touched.
    pub async fn new(
        config: IngestionConfig,
        loaders: LoaderRegistry,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        let chunker = config.validate()?;
        let model_id = embedder.model_id();
        let chunk_profile = chunk_profile(&chunker.profile(), &model_id);

        store
            .register_embedding_model(&EmbeddingModelRecord::from_provider(embedder.as_ref()))
            .await?;

        Ok(Self {
            config,
            chunker,
            loaders,
            embedder,
            store,
            model_id,
            chunk_profile,
        })
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Identifies chunker geometry and embedding model for every document this pipeline writes.
    pub fn chunk_profile(&self) -> &str {
        &self.chunk_profile
    }

    /// Ingest a file, or every regular file below a directory.
    pub async fn ingest(&self, path: &Path) -> IngestReport {
        let started = Instant::now();
        info!("Starting ingestion of {}", path.display());

        let (files, discovery_failures) = discover(path).await;
        debug!("Discovered {} files under {}", files.len(), path.display());

        let mut report = IngestReport::default();
        for failure in discovery_failures {
            report.record(FileOutcome::Failed(failure));
        }

        let outcomes: Vec<FileOutcome> = futures::stream::iter(files)
            .map(|file| self.process_file(file))
            .buffer_unordered(self.config.max_workers)
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }
        report.sort();

        info!(
            "Ingestion of {} finished in {:?}: {} stored, {} unchanged, {} skipped, {} failed",
            path.display(),
            started.elapsed(),
            report.succeeded.len(),
            report.unchanged.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Run one discovered file to a terminal state.
    pub async fn process_file(&self, path: PathBuf) -> FileOutcome {
        let Some(loader) = self.loaders.loader_for(&path) else {
            debug!("Skipping unsupported file {}", path.display());
            return FileOutcome::Skipped { path };
        };

        match self.ingest_file(&path, loader).await {
            Ok(Some(chunks)) => FileOutcome::Stored { path, chunks },
            Ok(None) => FileOutcome::Unchanged { path },
            Err((stage, error)) => {
                warn!("Failed to ingest {} at {}: {}", path.display(), stage, error);
                FileOutcome::Failed(FailedPath::new(path, stage, error))
            }
        }
    }

    /// Returns the number of chunks written, or `None` if the stored copy is current.
    async fn ingest_file(
        &self,
        path: &Path,
        loader: Arc<dyn DocumentLoader>,
    ) -> std::result::Result<Option<usize>, StageError> {
        let canonical = tokio::fs::canonicalize(path).await.map_err(|source| {
            (
                IngestStage::Loaded,
                Error::LoadFailure {
                    path: path.to_path_buf(),
                    source,
                },
            )
        })?;
        let loaded = loader
            .load(&canonical)
            .await
            .map_err(|e| (IngestStage::Loaded, e))?;

        let document = NewDocument::new(
            canonical.to_string_lossy(),
            loaded.content,
            loaded.metadata,
            self.chunk_profile.as_str(),
        );

        let existing = self
            .store
            .get_document(&document.path)
            .await
            .map_err(|e| (IngestStage::Stored, e))?;
        if let Some(existing) = existing
            && existing.is_unchanged(&document)
        {
            debug!("Unchanged: {}", document.path);
            return Ok(None);
        }

        let text_chunks: Vec<TextChunk> = self.chunker.chunks(&document.content).collect();
        let texts: Vec<String> = text_chunks.iter().map(|c| c.content.clone()).collect();

        let embeddings = self
            .embed(&texts)
            .await
            .map_err(|e| (IngestStage::Embedded, e))?;

        let chunks: Vec<NewChunk> = text_chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                NewChunk::from_text(chunk).with_embedding(embedding, self.model_id.as_str())
            })
            .collect();

        let upsert = self
            .store
            .replace_document(&document, &chunks)
            .await
            .map_err(|e| (IngestStage::Stored, e))?;

        if upsert.status == UpsertStatus::Unchanged {
            return Ok(None);
        }
        debug!(
            "Stored {} ({} chunks, {:?})",
            document.path,
            chunks.len(),
            upsert.status
        );
        Ok(Some(chunks.len()))
    }

    /// Embed all chunk texts of one file under the configured timeout.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f16>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let timeout = self.config.embed_timeout;
        let result = tokio::time::timeout(timeout, self.embedder.embed_texts(texts))
            .await
            .map_err(|_| EmbedError::Timeout { after: timeout })??;

        if result.len() != texts.len() {
            return Err(EmbedError::unexpected_response(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.len()
            ))
            .into());
        }

        let expected = self.embedder.embedding_dimension();
        if let Some(bad) = result.embeddings.iter().find(|e| e.len() != expected) {
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: bad.len(),
            }
            .into());
        }

        Ok(result.embeddings)
    }
}

/// Collect the regular files at or below `root`.
///
/// Symlinks to files are followed; symlinked directories are not. The vault
/// directory itself is never entered. Paths that cannot be inspected are
/// returned as discovery failures.
pub async fn discover(root: &Path) -> (Vec<PathBuf>, Vec<FailedPath>) {
    let mut files = Vec::new();
    let mut failures = Vec::new();

    let metadata = match tokio::fs::metadata(root).await {
        Ok(m) => m,
        Err(e) => {
            failures.push(FailedPath::new(root, IngestStage::Discovered, e));
            return (files, failures);
        }
    };
    if metadata.is_file() {
        files.push(root.to_path_buf());
        return (files, failures);
    }

    let mut dir_stack = vec![root.to_path_buf()];
    while let Some(current_dir) = dir_stack.pop() {
        let mut read_dir = match tokio::fs::read_dir(&current_dir).await {
            Ok(rd) => rd,
            Err(e) => {
                warn!("Failed to read directory {}: {}", current_dir.display(), e);
                failures.push(FailedPath::new(current_dir, IngestStage::Discovered, e));
                continue;
            }
        };

        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to list {}: {}", current_dir.display(), e);
                    failures.push(FailedPath::new(&current_dir, IngestStage::Discovered, e));
                    break;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    failures.push(FailedPath::new(path, IngestStage::Discovered, e));
                    continue;
                }
            };

            if file_type.is_dir() {
                if entry.file_name() == COMPASS_DIR {
                    debug!("Not descending into {}", path.display());
                } else {
                    dir_stack.push(path);
                }
            } else if file_type.is_file() {
                files.push(path);
            } else if file_type.is_symlink() {
                match tokio::fs::metadata(&path).await {
                    Ok(target) if target.is_file() => files.push(path),
                    Ok(_) => debug!("Not following directory symlink {}", path.display()),
                    Err(e) => {
                        warn!("Broken symlink {}: {}", path.display(), e);
                        failures.push(FailedPath::new(path, IngestStage::Discovered, e));
                    }
                }
            }
        }
    }

    files.sort();

    // File symlinks can lead several paths to one document
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(files.len());
    for path in files {
        match tokio::fs::canonicalize(&path).await {
            Ok(canonical) if !seen.insert(canonical.clone()) => {
                debug!("Already discovered {} under another path", path.display());
            }
            _ => unique.push(path),
        }
    }
    (unique, failures)
}
