//! compass-retriever: local-first retrieval-augmented generation core
//!
//! Ingests the documents of a vault into a private SQLite store and answers
//! queries with ranked, cited passages ready to hand to a language model.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: loaders, ingestion pipeline, retriever, reranker and query entry point
//! - **[`storage`]**: storage abstraction with the SQLite implementation
//! - **[`vault`]**: vault layout, creation and discovery
//! - **[`config`]**: layered TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use compass_retriever::retrieval::ingestion::{IngestionConfig, IngestionPipeline};
//! use compass_retriever::retrieval::loaders::LoaderRegistry;
//! use compass_retriever::vault::Vault;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let vault = Vault::discover(".")?;
//! let config = vault.config()?;
//! let embedder = compass_embed::create_provider(config.embed_config()).await?;
//! let store = Arc::new(vault.store().await?);
//!
//! let pipeline = IngestionPipeline::new(
//!     IngestionConfig::from(&config),
//!     LoaderRegistry::default(),
//!     embedder,
//!     store,
//! )
//! .await?;
//! let report = pipeline.ingest(vault.root()).await;
//! println!("{} files processed", report.processed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! write:  files → LoaderRegistry → TextChunker → EmbeddingProvider → DocumentStore
//! read:   query → Retriever → Reranker → format_context / generate_citations
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;
pub mod vault;

pub use config::CompassConfig;
pub use error::{Error, Result};
pub use retrieval::ingestion::{IngestReport, IngestionConfig, IngestionPipeline};
pub use retrieval::loaders::{DocumentLoader, LoaderRegistry};
pub use retrieval::query::{QueryAnswer, QueryEngine};
pub use retrieval::rerank::Reranker;
pub use retrieval::retriever::{Retriever, ScoredChunk};
pub use storage::DocumentStore;
pub use storage::sqlite_store::SqliteStore;
pub use vault::{Vault, find_vault};
