//! Second-pass ordering of retrieved chunks.
//!
//! A reranker only ever reorders and truncates its input; it never adds
//! candidates.

use super::retriever::ScoredChunk;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Weight of the lexical signal in [`Reranker::TermOverlap`].
const TERM_OVERLAP_WEIGHT: f32 = 0.3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reranker {
    /// Keep retrieval order, truncate to `top_k`
    #[default]
    #[serde(alias = "none")]
    Passthrough,
    /// Blend the retrieval score with the share of query terms found in the chunk
    TermOverlap,
}

impl Reranker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::TermOverlap => "term-overlap",
        }
    }

    /// Whether this reranker can change the order it is given.
    pub fn reorders(&self) -> bool {
        !matches!(self, Self::Passthrough)
    }

    /// Return at most `top_k` of `candidates`, best first.
    ///
    /// Ties keep their input order. Scores are left as the retriever set them.
    pub fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Vec<ScoredChunk> {
        if let Self::TermOverlap = self {
            let terms = terms(query);
            if !terms.is_empty() {
                let mut keyed: Vec<(f32, ScoredChunk)> = candidates
                    .into_iter()
                    .map(|c| (blended_score(&terms, &c), c))
                    .collect();
                // sort_by is stable
                keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
                candidates = keyed.into_iter().map(|(_, c)| c).collect();
            }
        }
        candidates.truncate(top_k);
        candidates
    }
}

impl std::fmt::Display for Reranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Reranker {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "passthrough" | "none" => Ok(Self::Passthrough),
            "term-overlap" | "term_overlap" => Ok(Self::TermOverlap),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown reranker '{other}' (expected passthrough or term-overlap)"
            ))),
        }
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn blended_score(query_terms: &HashSet<String>, candidate: &ScoredChunk) -> f32 {
    let chunk_terms = terms(&candidate.chunk.content);
    let hits = query_terms
        .iter()
        .filter(|t| chunk_terms.contains(*t))
        .count();
    let overlap = hits as f32 / query_terms.len() as f32;
    (1.0 - TERM_OVERLAP_WEIGHT) * candidate.score + TERM_OVERLAP_WEIGHT * overlap
}
