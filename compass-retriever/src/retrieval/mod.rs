pub mod ingestion;
pub mod loaders;
pub mod query;
pub mod rerank;
pub mod retriever;
