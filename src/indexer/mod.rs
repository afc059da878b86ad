//! Structural parsing: construct lookup, chunking and parsed artifacts
//!
//! Everything here is grammar-driven through [`SourceLanguage`]; the default
//! grammar is Python.

mod chunker;
mod language;
mod locator;
mod reparser;

pub use chunker::{ParsedChunk, StructuralChunker};
pub use language::SourceLanguage;
pub use locator::{Span, StructuralLocator};
pub use reparser::{ReparseSummary, Reparser};
