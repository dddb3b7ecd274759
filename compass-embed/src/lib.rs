//! # compass-embed
//!
//! Text embeddings behind one async trait, with local and remote backends.
//!
//! ## Features
//!
//! - **Local ONNX Models**: fastembed inference without external API calls
//! - **Remote Servers**: Ollama and OpenAI-compatible embedding endpoints
//! - **Model Caching**: fastembed models are loaded once per process
//! - **Half-Precision**: unit-normalized f16 vectors
//!
//! ## Quick Start
//!
//! ```no_run
//! use compass_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = create_provider(EmbedConfig::default()).await?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("{}: {} embeddings of dimension {}",
//!          provider.model_id(), result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`]: provider selection and tuning
//! - [`provider`]: the [`EmbeddingProvider`] trait, fastembed backend and factory
//! - [`remote`]: HTTP backends
//! - [`hash`]: deterministic test double
//! - [`error`]: error types and result handling

pub mod config;
pub mod error;
pub mod hash;
pub mod provider;
pub mod remote;

// Re-export main types for easy access
pub use config::{EmbedConfig, ProviderKind};
pub use error::{EmbedError, Result};
pub use half::f16;
pub use hash::HashEmbedder;
pub use provider::{
    EmbeddingProvider, EmbeddingResult, FastEmbedProvider, create_provider, to_f16_embedding,
};
pub use remote::{OllamaProvider, OpenAiProvider};
