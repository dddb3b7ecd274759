//! Layered configuration: built-in defaults overlaid by a TOML file.
//!
//! Keys are addressed by dotted paths such as `rag.chunk_size`. The typed
//! [`RagSettings`] and [`EmbeddingSettings`] views are re-derived from the
//! merged table whenever it changes, so both always agree.
//!
//! ```
//! use compass_retriever::config::CompassConfig;
//!
//! let config = CompassConfig::from_toml_str("[rag]\ntop_k = 8\n").unwrap();
//! assert_eq!(config.rag().top_k, 8);
//! assert_eq!(config.rag().chunk_size, 512);
//! assert!(config.is_set("rag.top_k"));
//! assert!(!config.is_set("rag.chunk_size"));
//! ```

use crate::error::{Error, Result};
use crate::retrieval::rerank::Reranker;
use compass_context::TextChunker;
use compass_embed::config::{DEFAULT_API_KEY_ENV, DEFAULT_FASTEMBED_MODEL, DEFAULT_HASH_DIMENSION};
use compass_embed::{EmbedConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml::{Table, Value};
use tracing::debug;

/// `[rag]`: chunking, retrieval and ingestion tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub reranker: Reranker,
    pub max_workers: usize,
    pub embed_timeout_secs: u64,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            top_k: 5,
            reranker: Reranker::default(),
            max_workers: 4,
            embed_timeout_secs: 60,
        }
    }
}

/// `[embedding]`: which embedder to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: DEFAULT_FASTEMBED_MODEL.to_string(),
            base_url: None,
            api_key_env: None,
            dimension: None,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    rag: RagSettings,
    embedding: EmbeddingSettings,
}

/// Defaults plus file overrides, with typed views.
#[derive(Debug, Clone, PartialEq)]
pub struct CompassConfig {
    settings: Settings,
    merged: Table,
    file_layer: Table,
    source: Option<PathBuf>,
}

impl Default for CompassConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            merged: default_table(),
            file_layer: Table::new(),
            source: None,
        }
    }
}

fn default_table() -> Table {
    match Value::try_from(Settings::default()) {
        Ok(Value::Table(table)) => table,
        _ => Table::new(),
    }
}

/// Recursively overlay `overlay` onto `base`; tables merge, everything else replaces.
fn deep_merge(base: &mut Table, overlay: &Table) {
    for (key, value) in overlay {
        if let Value::Table(incoming) = value
            && let Some(Value::Table(existing)) = base.get_mut(key)
        {
            deep_merge(existing, incoming);
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}

fn lookup<'a>(table: &'a Table, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = table.get(parts.next()?)?;
    for part in parts {
        current = current.as_table()?.get(part)?;
    }
    Some(current)
}

fn assign(table: &mut Table, key: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Config(format!("invalid key: {key:?}")));
    }
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| Error::Config("empty key".to_string()))?;

    let mut current = table;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        current = match entry {
            Value::Table(inner) => inner,
            _ => return Err(Error::Config(format!("{part} in {key} is not a table"))),
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

impl CompassConfig {
    /// Defaults overlaid by `path`, or plain defaults when `path` is absent or missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layers(path)
    }

    /// Defaults overlaid by each existing file in `paths`, later files winning.
    ///
    /// Missing files are skipped. [`source`](Self::source) names the last
    /// file that was read.
    pub fn load_layers<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<Self> {
        let mut file_layer = Table::new();
        let mut source = None;
        for path in paths {
            if !path.exists() {
                debug!("No config at {}, skipping", path.display());
                continue;
            }
            let layer: Table = std::fs::read_to_string(path)?.parse()?;
            deep_merge(&mut file_layer, &layer);
            debug!("Loaded config from {}", path.display());
            source = Some(path.to_path_buf());
        }

        if source.is_none() {
            return Ok(Self::default());
        }
        let mut config = Self::from_layer(file_layer)?;
        config.source = source;
        Ok(config)
    }

    /// Defaults overlaid by the given TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file_layer: Table = text.parse()?;
        Self::from_layer(file_layer)
    }

    fn from_layer(file_layer: Table) -> Result<Self> {
        let mut merged = default_table();
        deep_merge(&mut merged, &file_layer);
        // The TOML parsed, so a failure here is a value of the wrong type or range
        let settings: Settings = Value::Table(merged.clone())
            .try_into()
            .map_err(|e: toml::de::Error| Error::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            settings,
            merged,
            file_layer,
            source: None,
        })
    }

    /// File the overrides came from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn rag(&self) -> &RagSettings {
        &self.settings.rag
    }

    pub fn embedding(&self) -> &EmbeddingSettings {
        &self.settings.embedding
    }

    /// Effective value at a dotted path.
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.merged, key)
    }

    /// Whether the file layer sets `key`, as opposed to inheriting a default.
    pub fn is_set(&self, key: &str) -> bool {
        lookup(&self.file_layer, key).is_some()
    }

    /// Override `key` in the file layer.
    ///
    /// A value of the wrong type for a typed key is rejected and leaves the
    /// configuration unchanged.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let mut file_layer = self.file_layer.clone();
        assign(&mut file_layer, key, value.into())?;

        let mut rebuilt = Self::from_layer(file_layer)?;
        rebuilt.source = self.source.clone();
        *self = rebuilt;
        Ok(())
    }

    /// Serialize the file layer, the part worth persisting.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(&self.file_layer)?)
    }

    /// The chunker described by `rag.chunk_size` and `rag.chunk_overlap`.
    pub fn chunker(&self) -> Result<TextChunker> {
        Ok(TextChunker::new(
            self.settings.rag.chunk_size,
            self.settings.rag.chunk_overlap,
        )?)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.rag.embed_timeout_secs)
    }

    /// Embedder configuration for the `[embedding]` section.
    pub fn embed_config(&self) -> EmbedConfig {
        let section = &self.settings.embedding;
        let dimension = match (section.provider, section.dimension) {
            (ProviderKind::Hash, None) => Some(DEFAULT_HASH_DIMENSION),
            (_, dimension) => dimension,
        };
        let model_name = match section.provider {
            ProviderKind::Hash if section.model == DEFAULT_FASTEMBED_MODEL => "blake3".to_string(),
            _ => section.model.clone(),
        };

        EmbedConfig {
            provider: section.provider,
            model_name,
            base_url: section.base_url.clone(),
            api_key_env: section
                .api_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            dimension,
            batch_size: section.batch_size,
            timeout_secs: self.settings.rag.embed_timeout_secs,
            ..EmbedConfig::default()
        }
    }

    /// Reject settings no pipeline could run with.
    pub fn validate(&self) -> Result<()> {
        self.chunker()?;
        let rag = &self.settings.rag;
        if rag.max_workers == 0 {
            return Err(Error::InvalidConfiguration(
                "rag.max_workers must be at least 1".to_string(),
            ));
        }
        if rag.embed_timeout_secs == 0 {
            return Err(Error::InvalidConfiguration(
                "rag.embed_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.embed_config()
            .validate()
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = CompassConfig::default();
        assert_eq!(config.rag(), &RagSettings::default());
        assert_eq!(config.get("rag.chunk_size"), Some(&Value::Integer(512)));
        assert_eq!(config.get("rag.chunk_overlap"), Some(&Value::Integer(50)));
        assert_eq!(
            config.get("rag.reranker"),
            Some(&Value::String("passthrough".to_string()))
        );
        assert_eq!(
            config.get("embedding.provider"),
            Some(&Value::String("fastembed".to_string()))
        );
        assert_eq!(config.get("embedding.base_url"), None);
        assert_eq!(config.get("rag.missing"), None);
        assert!(!config.is_set("rag.top_k"));
        config.validate().unwrap();
    }

    #[test]
    fn test_overlay_merges_tables() -> anyhow::Result<()> {
        let config = CompassConfig::from_toml_str(
            r#"
            [vault]
            name = "notes"

            [rag]
            chunk_size = 256
            reranker = "term-overlap"

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            "#,
        )?;

        assert_eq!(config.rag().chunk_size, 256);
        assert_eq!(config.rag().chunk_overlap, 50);
        assert_eq!(config.rag().reranker, Reranker::TermOverlap);
        assert_eq!(config.embedding().provider, ProviderKind::Ollama);
        assert_eq!(
            config.get("vault.name").and_then(Value::as_str),
            Some("notes")
        );

        let embed = config.embed_config();
        assert_eq!(embed.provider, ProviderKind::Ollama);
        assert_eq!(embed.model_name, "nomic-embed-text");
        assert_eq!(embed.timeout_secs, 60);
        Ok(())
    }

    #[test]
    fn test_set_and_is_set() -> anyhow::Result<()> {
        let mut config = CompassConfig::default();
        config.set("rag.top_k", 9)?;
        assert_eq!(config.rag().top_k, 9);
        assert!(config.is_set("rag.top_k"));
        assert_eq!(config.get("rag.top_k"), Some(&Value::Integer(9)));

        config.set("preferences.default_llm", "local")?;
        assert_eq!(
            config.get("preferences.default_llm").and_then(Value::as_str),
            Some("local")
        );

        // Wrong type for a typed key leaves everything as it was
        assert!(config.set("rag.chunk_size", "big").is_err());
        assert_eq!(config.rag().chunk_size, 512);
        assert!(!config.is_set("rag.chunk_size"));

        let saved = config.to_toml_string()?;
        assert!(saved.contains("top_k = 9"));
        assert!(!saved.contains("chunk_size"));
        Ok(())
    }

    #[test]
    fn test_validation() -> anyhow::Result<()> {
        let config = CompassConfig::from_toml_str("[rag]\nchunk_size = 10\nchunk_overlap = 10\n")?;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));

        let config = CompassConfig::from_toml_str("[rag]\nmax_workers = 0\n")?;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));

        let config = CompassConfig::from_toml_str("[embedding]\nbatch_size = 0\n")?;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));

        assert!(matches!(
            CompassConfig::from_toml_str("[rag\n"),
            Err(Error::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn test_negative_sizes_are_invalid_configuration() -> anyhow::Result<()> {
        for text in [
            "[rag]\nchunk_size = -5\n",
            "[rag]\nchunk_overlap = -1\n",
            "[rag]\ntop_k = -3\n",
        ] {
            assert!(
                matches!(
                    CompassConfig::from_toml_str(text),
                    Err(Error::InvalidConfiguration(_))
                ),
                "{text}"
            );
        }

        let config = CompassConfig::from_toml_str("[rag]\nchunk_size = 0\n")?;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
        Ok(())
    }

    #[test]
    fn test_hash_provider_defaults() -> anyhow::Result<()> {
        let config = CompassConfig::from_toml_str("[embedding]\nprovider = \"hash\"\n")?;
        let embed = config.embed_config();
        assert_eq!(embed.provider, ProviderKind::Hash);
        assert_eq!(embed.model_name, "blake3");
        assert_eq!(embed.dimension, Some(DEFAULT_HASH_DIMENSION));
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("profile.toml");

        let missing = CompassConfig::load(Some(&path))?;
        assert_eq!(missing, CompassConfig::default());

        std::fs::write(&path, "[rag]\nmax_workers = 2\n")?;
        let config = CompassConfig::load(Some(&path))?;
        assert_eq!(config.rag().max_workers, 2);
        assert_eq!(config.source(), Some(path.as_path()));
        Ok(())
    }

    #[test]
    fn test_override_file_layers_over_profile() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let profile = dir.path().join("profile.toml");
        let local = dir.path().join("local.toml");
        std::fs::write(
            &profile,
            "[embedding]\nprovider = \"hash\"\n\n[rag]\ntop_k = 7\nchunk_size = 300\n",
        )?;
        std::fs::write(&local, "[rag]\nchunk_size = 128\nchunk_overlap = 16\n")?;

        let config = CompassConfig::load_layers([profile.as_path(), local.as_path()])?;
        assert_eq!(config.embedding().provider, ProviderKind::Hash);
        assert_eq!(config.rag().top_k, 7);
        assert_eq!(config.rag().chunk_size, 128);
        assert_eq!(config.rag().chunk_overlap, 16);
        assert!(config.is_set("embedding.provider"));
        assert_eq!(config.source(), Some(local.as_path()));

        // A missing override leaves the profile in charge
        let absent = dir.path().join("absent.toml");
        let config = CompassConfig::load_layers([profile.as_path(), absent.as_path()])?;
        assert_eq!(config.rag().chunk_size, 300);
        assert_eq!(config.source(), Some(profile.as_path()));
        Ok(())
    }
}
