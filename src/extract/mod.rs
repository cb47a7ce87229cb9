//! Turns fetched HTML into structured lead signals.

pub mod document;
pub mod parser;

pub use document::{ExtractedDocument, PageMeta};
pub use parser::Extractor;
