//! Context and citation assembly for retrieved passages.
//!
//! [`format_context`] and [`generate_citations`] number their input the same
//! way (1-based, input order), so a marker `[i]` in generated text always
//! refers to the `[Document i - ...]` block that was shown to the model.
//!
//! ```
//! use compass_context::citation::{Passage, format_context, generate_citations};
//!
//! let passages = vec![
//!     Passage::new("notes/a.md", "Alpha"),
//!     Passage::new("notes/b.md", "Beta"),
//! ];
//!
//! assert_eq!(
//!     format_context(&passages),
//!     "[Document 1 - notes/a.md]\nAlpha\n\n[Document 2 - notes/b.md]\nBeta"
//! );
//! assert_eq!(
//!     generate_citations(&passages),
//!     "Sources:\n[1] notes/a.md\n[2] notes/b.md"
//! );
//! ```

use serde::Serialize;

/// Source label used when a passage cannot name its origin.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Anything that can be shown to a model as a cited passage.
pub trait Citable {
    /// Human-readable origin, usually a file path.
    fn source(&self) -> &str;

    /// Passage text.
    fn content(&self) -> &str;
}

/// Minimal owned passage, handy for callers without their own chunk type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Passage {
    pub source: String,
    pub content: String,
}

impl Passage {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
        }
    }
}

impl Citable for Passage {
    fn source(&self) -> &str {
        &self.source
    }

    fn content(&self) -> &str {
        &self.content
    }
}

impl<T: Citable + ?Sized> Citable for &T {
    fn source(&self) -> &str {
        (**self).source()
    }

    fn content(&self) -> &str {
        (**self).content()
    }
}

fn source_label<C: Citable>(passage: &C) -> &str {
    let source = passage.source();
    if source.is_empty() {
        UNKNOWN_SOURCE
    } else {
        source
    }
}

/// Render passages as `[Document i - <source>]` blocks separated by a blank line.
pub fn format_context<C: Citable>(passages: &[C]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[Document {} - {}]\n{}", i + 1, source_label(p), p.content()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render a `Sources:` list with one `[i] <source>` line per passage.
///
/// Returns an empty string, not a bare header, when there is nothing to cite.
pub fn generate_citations<C: Citable>(passages: &[C]) -> String {
    if passages.is_empty() {
        return String::new();
    }

    let mut out = String::from("Sources:");
    for (i, p) in passages.iter().enumerate() {
        out.push_str(&format!("\n[{}] {}", i + 1, source_label(p)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let none: Vec<Passage> = Vec::new();
        assert_eq!(format_context(&none), "");
        assert_eq!(generate_citations(&none), "");
    }

    #[test]
    fn test_markers_line_up() {
        let passages: Vec<Passage> = (1..=4)
            .map(|i| Passage::new(format!("doc{i}.md"), format!("body {i}")))
            .collect();

        let context = format_context(&passages);
        let citations = generate_citations(&passages);

        assert_eq!(context.matches("[Document ").count(), 4);
        assert_eq!(citations.lines().count(), 5);

        for i in 1..=4 {
            assert!(context.contains(&format!("[Document {i} - doc{i}.md]\nbody {i}")));
            assert!(citations.contains(&format!("[{i}] doc{i}.md")));
        }
    }

    #[test]
    fn test_missing_source_is_labelled_unknown() {
        let passages = [Passage::new("", "orphan text")];
        assert_eq!(format_context(&passages), "[Document 1 - unknown]\norphan text");
        assert_eq!(generate_citations(&passages), "Sources:\n[1] unknown");
    }

    #[test]
    fn test_accepts_borrowed_passages() {
        let owned = vec![Passage::new("a.txt", "A")];
        let borrowed: Vec<&Passage> = owned.iter().collect();
        assert_eq!(format_context(&borrowed), format_context(&owned));
    }
}
