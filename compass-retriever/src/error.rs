//! Error type shared by every compass-retriever operation

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No loader is registered for the file's extension
    #[error("unsupported format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    /// The file could not be read
    #[error("failed to load {}: {source}", .path.display())]
    LoadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailure(#[from] compass_embed::EmbedError),

    /// The query vector cannot be compared with anything in the store
    #[error("query embedding has dimension {query}, stored embeddings have {stored:?}")]
    EmbeddingDimensionMismatch { query: usize, stored: Vec<usize> },

    #[error("document {document_id} does not exist")]
    ForeignKeyViolation { document_id: i64 },

    /// A write transaction was rolled back; prior rows are untouched
    #[error("store transaction failed: {0}")]
    StoreTransactionFailure(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("vault already initialized at {}", .0.display())]
    VaultAlreadyInitialized(PathBuf),

    #[error("no vault found at or above {}", .0.display())]
    VaultNotFound(PathBuf),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<compass_context::ChunkError> for Error {
    fn from(e: compass_context::ChunkError) -> Self {
        Self::InvalidConfiguration(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::Config(e.to_string())
    }
}
