pub mod scheduler;
pub mod task;
pub mod worker;

// Re-export common types
pub use scheduler::{ingest_seeds, Scheduler, SeedReport};
pub use task::{OrganizationRecord, Task};
pub use worker::{TaskOutcome, Worker};
