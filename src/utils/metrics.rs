use std::ops::AddAssign;
use std::time::Instant;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Per-worker counters, reported at shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    /// When the worker started
    pub started_at: DateTime<Utc>,

    /// Tasks that went through the whole pipeline
    pub processed: u64,

    /// Tasks skipped because their domain already had a record
    pub skipped: u64,

    /// Tasks that failed (fetch, malformed payload, queue errors)
    pub errored: u64,

    /// Failed fetches put back on the queue
    pub requeued: u64,

    /// Records written to the local fallback log instead of the store
    pub fallback_writes: u64,

    /// Level-1 tasks enqueued from discovered links
    pub discovered: u64,

    /// Successful identity rotations
    pub rotations: u64,

    /// Completion tokens consumed by classification
    pub tokens: u64,

    /// Bytes of HTML downloaded
    pub bytes_downloaded: u64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            processed: 0,
            skipped: 0,
            errored: 0,
            requeued: 0,
            fallback_writes: 0,
            discovered: 0,
            rotations: 0,
            tokens: 0,
            bytes_downloaded: 0,
        }
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed tasks per minute since start
    pub fn rate_per_minute(&self) -> f64 {
        let elapsed = (Utc::now() - self.started_at).num_seconds().max(1) as f64;
        self.processed as f64 * 60.0 / elapsed
    }
}

impl AddAssign<&WorkerStats> for WorkerStats {
    fn add_assign(&mut self, other: &WorkerStats) {
        self.started_at = self.started_at.min(other.started_at);
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.errored += other.errored;
        self.requeued += other.requeued;
        self.fallback_writes += other.fallback_writes;
        self.discovered += other.discovered;
        self.rotations += other.rotations;
        self.tokens += other.tokens;
        self.bytes_downloaded += other.bytes_downloaded;
    }
}

/// Request timer for measuring stage durations
pub struct RequestTimer {
    /// Start time of the request
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate() {
        let mut total = WorkerStats::new();
        let a = WorkerStats { processed: 3, errored: 1, tokens: 100, ..WorkerStats::new() };
        let b = WorkerStats { processed: 2, skipped: 4, tokens: 50, ..WorkerStats::new() };
        total += &a;
        total += &b;

        assert_eq!(total.processed, 5);
        assert_eq!(total.errored, 1);
        assert_eq!(total.skipped, 4);
        assert_eq!(total.tokens, 150);
    }
}
