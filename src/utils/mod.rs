pub mod csv;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod domain;

// Re-export common functions and types
pub use logging::{init_logging, default_log_file};
pub use metrics::{WorkerStats, RequestTimer};
pub use retry::RetryPolicy;
