//! Embedding providers backed by an HTTP server
//!
//! Both providers batch requests by `EmbedConfig::batch_size`, apply the
//! configured timeout to every request, and verify that the server returned
//! one vector per input with the expected width. When no dimension is
//! configured it is probed once at construction time, so an unreachable
//! server fails provider creation instead of the first ingestion.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, check_dimensions, to_f16_embedding};
use async_trait::async_trait;
use half::f16;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROBE_TEXT: &str = "dimension probe";

/// One JSON endpoint plus the client and credentials used to reach it.
#[derive(Clone)]
struct JsonEndpoint {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for JsonEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonEndpoint")
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl JsonEndpoint {
    fn new(config: &EmbedConfig, path: &str, bearer: Option<String>) -> Result<Self> {
        let base = config.resolved_base_url().ok_or_else(|| {
            EmbedError::invalid_config(format!("{} provider needs a base URL", config.provider))
        })?;
        let timeout = config.timeout();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{base}{path}"),
            bearer,
            timeout,
        })
    }

    async fn post<B, R>(&self, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(&self.url).json(body);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbedError::unexpected_response(format!(
                "{} returned {status}: {}",
                self.url,
                text.trim()
            )));
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            EmbedError::unexpected_response(format!("malformed body from {}: {e}", self.url))
        })
    }

    fn classify(&self, error: reqwest::Error) -> EmbedError {
        if error.is_timeout() {
            EmbedError::Timeout {
                after: self.timeout,
            }
        } else {
            EmbedError::Http { source: error }
        }
    }
}

fn expect_count<T>(items: &[T], expected: usize) -> Result<()> {
    if items.len() == expected {
        Ok(())
    } else {
        Err(EmbedError::unexpected_response(format!(
            "asked for {expected} embeddings, got {}",
            items.len()
        )))
    }
}

/// Settle on a dimension: the configured one, or whatever a probe returns.
async fn resolve_dimension<P: EmbeddingProvider + ?Sized>(
    provider: &P,
    configured: Option<usize>,
) -> Result<usize> {
    let probe = provider.embed_text(PROBE_TEXT).await?;
    let actual = probe.len();
    if actual == 0 {
        return Err(EmbedError::unexpected_response(
            "server returned an empty probe embedding",
        ));
    }
    match configured {
        Some(expected) if expected != actual => {
            Err(EmbedError::DimensionMismatch { expected, actual })
        }
        _ => Ok(actual),
    }
}

/// Embeddings from an Ollama server (`POST /api/embed`).
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    config: EmbedConfig,
    endpoint: JsonEndpoint,
    dimension: usize,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let endpoint = JsonEndpoint::new(&config, "/api/embed", None)?;
        tracing::info!("Using Ollama embeddings at {}", endpoint.url);

        let mut provider = Self {
            dimension: config.dimension.unwrap_or(0),
            config,
            endpoint,
        };
        provider.dimension = resolve_dimension(&provider, provider.config.dimension).await?;
        Ok(provider)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f16>>> {
        let response: OllamaResponse = self
            .endpoint
            .post(&OllamaRequest {
                model: &self.config.model_name,
                input: batch,
            })
            .await?;
        expect_count(&response.embeddings, batch.len())?;
        Ok(response
            .embeddings
            .into_iter()
            .map(|e| to_f16_embedding(e, self.config.normalize))
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let mut result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .pop()
            .ok_or_else(|| EmbedError::unexpected_response("no embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            tracing::debug!("Requesting {} Ollama embeddings", batch.len());
            embeddings.extend(self.embed_batch(batch).await?);
        }
        // Zero until the construction probe has run
        if self.dimension > 0 {
            check_dimensions(&embeddings, self.dimension)?;
        }
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn is_normalized(&self) -> bool {
        self.config.normalize
    }
}

/// Embeddings from an OpenAI-compatible server (`POST /embeddings`).
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    config: EmbedConfig,
    endpoint: JsonEndpoint,
    dimension: usize,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiItem>,
}

#[derive(Deserialize)]
struct OpenAiItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let bearer = std::env::var(&config.api_key_env).ok();
        if bearer.is_none() {
            tracing::warn!(
                "{} is not set; sending embedding requests without authorization",
                config.api_key_env
            );
        }
        let endpoint = JsonEndpoint::new(&config, "/embeddings", bearer)?;
        tracing::info!("Using OpenAI-compatible embeddings at {}", endpoint.url);

        let mut provider = Self {
            dimension: config.dimension.unwrap_or(0),
            config,
            endpoint,
        };
        provider.dimension = resolve_dimension(&provider, provider.config.dimension).await?;
        Ok(provider)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f16>>> {
        let response: OpenAiResponse = self
            .endpoint
            .post(&OpenAiRequest {
                model: &self.config.model_name,
                input: batch,
            })
            .await?;
        expect_count(&response.data, batch.len())?;

        // Servers may answer out of order; `index` is authoritative
        let mut items = response.data;
        items.sort_by_key(|item| item.index);
        Ok(items
            .into_iter()
            .map(|item| to_f16_embedding(item.embedding, self.config.normalize))
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let mut result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .pop()
            .ok_or_else(|| EmbedError::unexpected_response("no embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            tracing::debug!("Requesting {} OpenAI-compatible embeddings", batch.len());
            embeddings.extend(self.embed_batch(batch).await?);
        }
        if self.dimension > 0 {
            check_dimensions(&embeddings, self.dimension)?;
        }
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn is_normalized(&self) -> bool {
        self.config.normalize
    }
}
