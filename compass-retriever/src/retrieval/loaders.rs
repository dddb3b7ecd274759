//! Extension-keyed document loaders.
//!
//! A [`LoaderRegistry`] maps lowercase file extensions to [`DocumentLoader`]
//! trait objects. Adding a format means registering another loader; existing
//! loaders are never touched. A lookup miss is an unsupported format, which
//! the ingestion pipeline records as skipped rather than failed.

use crate::error::{Error, Result};
use crate::storage::DocumentMetadata;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Text and metadata extracted from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Short name stored as the document's `kind`.
    fn kind(&self) -> &str;

    async fn load(&self, path: &Path) -> Result<LoadedDocument>;
}

/// Read a file as UTF-8, replacing undecodable bytes with U+FFFD.
async fn read_lossy(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(|source| Error::LoadFailure {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn base_metadata(path: &Path, kind: &str) -> DocumentMetadata {
    DocumentMetadata {
        source: path.to_string_lossy().into_owned(),
        kind: kind.to_string(),
        ..Default::default()
    }
}

/// Plain text, loaded verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    fn kind(&self) -> &str {
        "text"
    }

    async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        Ok(LoadedDocument {
            content: read_lossy(path).await?,
            metadata: base_metadata(path, self.kind()),
        })
    }
}

/// Markdown, loaded verbatim with the first top-level heading as title.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownLoader;

impl MarkdownLoader {
    fn title(content: &str) -> Option<String> {
        content
            .lines()
            .find_map(|line| line.trim_start().strip_prefix("# "))
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
    }
}

#[async_trait]
impl DocumentLoader for MarkdownLoader {
    fn kind(&self) -> &str {
        "markdown"
    }

    async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let content = read_lossy(path).await?;
        let mut metadata = base_metadata(path, self.kind());
        metadata.title = Self::title(&content);
        Ok(LoadedDocument { content, metadata })
    }
}

/// Loaders by lowercase extension.
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn DocumentLoader>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl LoaderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Markdown (`md`, `markdown`) and plain text (`txt`, `log`, `text`).
    pub fn with_defaults() -> Self {
        let markdown: Arc<dyn DocumentLoader> = Arc::new(MarkdownLoader);
        let text: Arc<dyn DocumentLoader> = Arc::new(TextLoader);

        let mut registry = Self::new();
        for ext in ["md", "markdown"] {
            registry.register(ext, markdown.clone());
        }
        for ext in ["txt", "log", "text"] {
            registry.register(ext, text.clone());
        }
        registry
    }

    /// Map `extension` (with or without a leading dot) to `loader`, replacing any previous entry.
    pub fn register(&mut self, extension: &str, loader: Arc<dyn DocumentLoader>) {
        let key = extension.trim_start_matches('.').to_lowercase();
        self.loaders.insert(key, loader);
    }

    /// The loader for `path`, or `None` when its format is unsupported.
    pub fn loader_for(&self, path: &Path) -> Option<Arc<dyn DocumentLoader>> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.loaders.get(&ext).cloned()
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.loader_for(path).is_some()
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut extensions: Vec<_> = self.loaders.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    /// Load `path` with its registered loader.
    pub async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let loader = self
            .loader_for(path)
            .ok_or_else(|| Error::UnsupportedFormat {
                path: path.to_path_buf(),
            })?;
        loader.load(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct CsvLoader;

    #[async_trait]
    impl DocumentLoader for CsvLoader {
        fn kind(&self) -> &str {
            "csv"
        }

        async fn load(&self, path: &Path) -> Result<LoadedDocument> {
            let content = read_lossy(path).await?.replace(',', " ");
            Ok(LoadedDocument {
                content,
                metadata: base_metadata(path, self.kind()),
            })
        }
    }

    #[tokio::test]
    async fn test_markdown_title_and_text() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("Notes.MD");
        tokio::fs::write(&path, "intro\n# Weekly Plan \n\nbody").await?;

        let loaded = LoaderRegistry::default().load(&path).await?;
        assert_eq!(loaded.content, "intro\n# Weekly Plan \n\nbody");
        assert_eq!(loaded.metadata.kind, "markdown");
        assert_eq!(loaded.metadata.title.as_deref(), Some("Weekly Plan"));
        assert_eq!(loaded.metadata.source, path.to_string_lossy());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.txt");
        tokio::fs::write(&path, b"ok \xff\xfe done").await?;

        let loaded = LoaderRegistry::default().load(&path).await?;
        assert!(loaded.content.starts_with("ok "));
        assert!(loaded.content.contains('\u{FFFD}'));
        assert!(loaded.content.ends_with(" done"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_and_missing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let registry = LoaderRegistry::default();

        let pdf = dir.path().join("paper.pdf");
        tokio::fs::write(&pdf, b"%PDF").await?;
        assert!(registry.loader_for(&pdf).is_none());
        assert!(!registry.is_supported(&dir.path().join("Makefile")));
        assert!(matches!(
            registry.load(&pdf).await,
            Err(Error::UnsupportedFormat { .. })
        ));

        let missing = dir.path().join("gone.txt");
        assert!(matches!(
            registry.load(&missing).await,
            Err(Error::LoadFailure { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_register_new_format() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("table.csv");
        tokio::fs::write(&path, "a,b,c").await?;

        let mut registry = LoaderRegistry::with_defaults();
        registry.register(".CSV", Arc::new(CsvLoader));

        assert_eq!(
            registry.extensions(),
            vec!["csv", "log", "markdown", "md", "text", "txt"]
        );
        let loaded = registry.load(&path).await?;
        assert_eq!(loaded.content, "a b c");
        assert_eq!(loaded.metadata.kind, "csv");
        assert_eq!(
            registry.loader_for(Path::new("x.md")).map(|l| l.kind().to_string()),
            Some("markdown".to_string())
        );
        Ok(())
    }
}
