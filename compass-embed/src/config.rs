//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which backend turns text into vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local ONNX inference through fastembed
    #[default]
    FastEmbed,
    /// Ollama's `/api/embed` endpoint
    Ollama,
    /// Any OpenAI-compatible `/embeddings` endpoint
    OpenAi,
    /// Deterministic content hash, for tests and offline smoke runs
    Hash,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastEmbed => "fastembed",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Hash => "hash",
        }
    }

    /// Whether this provider talks to a server over HTTP.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Ollama | Self::OpenAi)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fastembed" => Ok(Self::FastEmbed),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "hash" => Ok(Self::Hash),
            other => Err(EmbedError::invalid_config(format!(
                "unknown embedding provider '{other}' (expected fastembed, ollama, openai or hash)"
            ))),
        }
    }
}

pub const DEFAULT_FASTEMBED_MODEL: &str = "all-minilm-l6-v2";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_HASH_DIMENSION: usize = 64;

/// Configuration for embedding providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Backend to construct
    pub provider: ProviderKind,
    /// Model name as the backend knows it
    pub model_name: String,
    /// Server root for remote providers; a provider default applies when unset
    pub base_url: Option<String>,
    /// Environment variable holding the bearer token for OpenAI-compatible servers
    pub api_key_env: String,
    /// Expected vector width; probed from the backend when unset
    pub dimension: Option<usize>,
    /// Maximum number of texts per backend call
    pub batch_size: usize,
    /// Per-request timeout for remote providers
    pub timeout_secs: u64,
    /// Whether to unit-normalize embeddings
    pub normalize: bool,
    /// Where fastembed keeps downloaded model files
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            model_name: DEFAULT_FASTEMBED_MODEL.to_string(),
            base_url: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            dimension: None,
            batch_size: 16,
            timeout_secs: 60,
            normalize: true,
            cache_dir: None,
        }
    }
}

impl EmbedConfig {
    /// A fastembed configuration for the named model.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn fastembed(model_name: impl Into<String>) -> Self {
        Self::new(model_name)
    }

    pub fn ollama(model_name: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Ollama,
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn openai(model_name: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Deterministic hash embeddings of the given width.
    pub fn hash(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Hash,
            model_name: "blake3".to_string(),
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..self
        }
    }

    pub fn with_api_key_env(self, api_key_env: impl Into<String>) -> Self {
        Self {
            api_key_env: api_key_env.into(),
            ..self
        }
    }

    pub fn with_dimension(self, dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..self
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn with_timeout_secs(self, timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            ..self
        }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    pub fn with_cache_dir(self, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..self
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The configured server root, or the provider's well-known default.
    ///
    /// Trailing slashes are trimmed so endpoint paths can be appended directly.
    pub fn resolved_base_url(&self) -> Option<String> {
        let url = match (&self.base_url, self.provider) {
            (Some(url), _) => url.clone(),
            (None, ProviderKind::Ollama) => DEFAULT_OLLAMA_URL.to_string(),
            (None, ProviderKind::OpenAi) => DEFAULT_OPENAI_URL.to_string(),
            (None, _) => return None,
        };
        Some(url.trim_end_matches('/').to_string())
    }

    /// Check everything that can be checked without contacting a backend.
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config(
                "batch size must be greater than zero",
            ));
        }
        if self.dimension == Some(0) {
            return Err(EmbedError::invalid_config(
                "embedding dimension must be greater than zero",
            ));
        }
        if self.provider.is_remote() && self.timeout_secs == 0 {
            return Err(EmbedError::invalid_config(
                "remote providers need a timeout greater than zero",
            ));
        }
        if self.provider == ProviderKind::Hash && self.dimension.is_none() {
            return Err(EmbedError::invalid_config(
                "the hash provider needs an explicit dimension",
            ));
        }
        Ok(())
    }
}
