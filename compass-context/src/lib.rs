//! Text utilities for the compass retrieval pipeline.
//!
//! - [`text`]: sliding-window chunking with stable positions and character offsets
//! - [`citation`]: context blocks and citation lists for retrieved passages

pub mod citation;
pub mod text;

pub use citation::{Citable, Passage, format_context, generate_citations};
pub use text::{ChunkError, Chunks, TextChunk, TextChunker, chunk};
