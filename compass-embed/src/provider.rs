//! Embedding provider trait and the local fastembed implementation

use crate::config::{EmbedConfig, ProviderKind};
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Result of embedding generation
#[derive(Debug, Clone, Default)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result, inferring the dimension from the first vector.
    ///
    /// An empty result has dimension 0.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts, preserving input order.
    ///
    /// The default embeds one text at a time. Backends with a batch endpoint
    /// override this.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(EmbeddingResult::new(embeddings))
    }

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Get the model this provider embeds with
    fn model_name(&self) -> &str;

    /// Stable identifier `provider:model:dimension`.
    ///
    /// Vectors are only comparable when they share a model id.
    fn model_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.provider_name(),
            self.model_name(),
            self.embedding_dimension()
        )
    }

    /// Whether vectors from this provider are unit length
    fn is_normalized(&self) -> bool {
        true
    }
}

/// Build the provider selected by `config.provider`.
///
/// Configuration errors, unknown models and unreachable backends all surface
/// here rather than on the first embedding call.
pub async fn create_provider(config: EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    tracing::info!(
        "Creating {} embedding provider for model: {}",
        config.provider,
        config.model_name()
    );

    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::FastEmbed => Arc::new(FastEmbedProvider::create(config).await?),
        ProviderKind::Ollama => Arc::new(crate::remote::OllamaProvider::create(config).await?),
        ProviderKind::OpenAi => Arc::new(crate::remote::OpenAiProvider::create(config).await?),
        ProviderKind::Hash => Arc::new(crate::hash::HashEmbedder::from_config(&config)?),
    };

    tracing::info!("Embedding provider ready: {}", provider.model_id());
    Ok(provider)
}

/// Convert an f32 vector to f16, optionally scaling it to unit length first.
///
/// Normalization happens in f32 so the rounding to half precision does not
/// skew the norm. A zero vector is returned unchanged.
pub fn to_f16_embedding(embedding: Vec<f32>, normalize: bool) -> Vec<f16> {
    let norm = if normalize {
        embedding.iter().map(|x| x * x).sum::<f32>().sqrt()
    } else {
        0.0
    };

    if norm > 0.0 {
        embedding.into_iter().map(|x| f16::from_f32(x / norm)).collect()
    } else {
        embedding.into_iter().map(f16::from_f32).collect()
    }
}

/// Check that every vector has `expected` components.
pub(crate) fn check_dimensions(embeddings: &[Vec<f16>], expected: usize) -> Result<()> {
    match embeddings.iter().find(|e| e.len() != expected) {
        Some(bad) => Err(EmbedError::DimensionMismatch {
            expected,
            actual: bad.len(),
        }),
        None => Ok(()),
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn lock_model_cache() -> Result<MutexGuard<'static, HashMap<String, ModelCacheEntry>>> {
    MODEL_CACHE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .map_err(|_| EmbedError::invalid_config("embedding model cache lock poisoned"))
}

/// Map a configured model name onto a fastembed built-in model.
pub fn fastembed_model(name: &str) -> Result<EmbeddingModel> {
    let model = match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
            EmbeddingModel::AllMiniLML6V2
        }
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => {
            EmbeddingModel::NomicEmbedTextV15
        }
        "multilingual-e5-small" | "intfloat/multilingual-e5-small" => {
            EmbeddingModel::MultilingualE5Small
        }
        other => {
            return Err(EmbedError::invalid_config(format!(
                "fastembed has no built-in model named '{other}'"
            )));
        }
    };
    Ok(model)
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`initialize`](Self::initialize) before embedding.
    pub fn new(config: EmbedConfig) -> Self {
        let dimension = config.dimension.unwrap_or(0);
        Self {
            config,
            model: None,
            dimension,
        }
    }

    /// Downloads (if needed) and loads the embedding model, reusing a cached instance.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );

        let model_kind = fastembed_model(self.config.model_name())?;
        let cache_key = self.create_cache_key()?;

        let cached = lock_model_cache()?
            .get(&cache_key)
            .map(|(model, dim)| (Arc::clone(model), *dim));

        let (model, dimension) = match cached {
            Some(entry) => {
                tracing::info!("Using cached model for: {}", self.config.model_name());
                entry
            }
            None => {
                let cache_dir = self.config.cache_dir.clone();
                let name = self.config.model_name().to_string();
                let (model, dimension) =
                    tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                        tracing::info!("Loading embedding model: {}", name);

                        let mut init_options =
                            InitOptions::new(model_kind).with_show_download_progress(false);
                        if let Some(dir) = cache_dir {
                            init_options = init_options.with_cache_dir(dir);
                        }

                        let mut model = TextEmbedding::try_new(init_options)
                            .map_err(|e| EmbedError::External { source: e })?;

                        // Probe the width with a throwaway embedding
                        let probe = model
                            .embed(vec!["dimension probe".to_string()], None)
                            .map_err(|e| EmbedError::External { source: e })?;
                        let dimension = probe.first().map(|e| e.len()).unwrap_or(0);
                        if dimension == 0 {
                            return Err(EmbedError::unexpected_response(
                                "model produced an empty probe embedding",
                            ));
                        }

                        tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                        Ok((model, dimension))
                    })
                    .await??;

                let model = Arc::new(Mutex::new(model));
                lock_model_cache()?.insert(cache_key, (Arc::clone(&model), dimension));
                (model, dimension)
            }
        };

        if let Some(expected) = self.config.dimension
            && expected != dimension
        {
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: dimension,
            });
        }

        self.model = Some(model);
        self.dimension = dimension;
        Ok(())
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Cache key derived from the whole configuration.
    fn create_cache_key(&self) -> Result<String> {
        let config_json =
            serde_json::to_string(&self.config).map_err(|e| EmbedError::External {
                source: e.into(),
            })?;

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    /// Clears the global model cache.
    pub fn clear_cache() -> Result<()> {
        lock_model_cache()?.clear();
        tracing::info!("Model cache cleared");
        Ok(())
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> Result<usize> {
        Ok(lock_model_cache()?.len())
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::unexpected_response("no embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            let model = Arc::clone(model);

            let raw = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", batch.len());
                let mut guard = model
                    .lock()
                    .map_err(|_| EmbedError::invalid_config("embedding model lock poisoned"))?;
                guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            all_embeddings.extend(
                raw.into_iter()
                    .map(|e| to_f16_embedding(e, self.config.normalize)),
            );
        }

        if all_embeddings.len() != texts.len() {
            return Err(EmbedError::unexpected_response(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                all_embeddings.len()
            )));
        }
        check_dimensions(&all_embeddings, self.dimension)?;

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_name(&self) -> &str {
        self.config.model_name()
    }

    fn is_normalized(&self) -> bool {
        self.config.normalize
    }
}
