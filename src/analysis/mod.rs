pub mod classifier;
pub mod client;
pub mod models;
pub mod scorer;

pub use classifier::Classifier;
pub use models::{Classification, ClassificationResult};
pub use scorer::{Scorer, Tier};
