pub mod backup;
pub mod queue;
pub mod results;

#[cfg(test)]
pub mod memory;

// Re-export common types
pub use backup::FallbackLog;
pub use queue::{FrontierStore, RedisFrontier};
pub use results::{PostgresResultStore, ResultStore};
