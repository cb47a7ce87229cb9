pub mod control;
pub mod fetcher;

// Re-export common types
pub use fetcher::{AnonymizingFetcher, PageFetcher};
