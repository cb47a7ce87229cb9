//! In-process stores for exercising the worker without Redis or Postgres.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::crawler::task::{OrganizationRecord, Task};
use crate::error::{QueueError, StoreError};
use crate::storage::queue::FrontierStore;
use crate::storage::results::ResultStore;

#[derive(Default)]
pub struct MemoryFrontier {
    queue: Mutex<VecDeque<Task>>,
    seen: Mutex<HashSet<String>>,
    push_fails: AtomicBool,
}

impl MemoryFrontier {
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            queue: Mutex::new(tasks.into_iter().collect()),
            seen: Mutex::new(HashSet::new()),
            push_fails: AtomicBool::new(false),
        }
    }

    /// Make every push fail as if Redis dropped the command
    pub fn set_push_failing(&self, failing: bool) {
        self.push_fails.store(failing, Ordering::SeqCst);
    }

    pub fn queued(&self) -> Vec<Task> {
        self.queue.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl FrontierStore for MemoryFrontier {
    async fn push(&self, task: &Task) -> Result<(), QueueError> {
        if self.push_fails.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("simulated push failure".to_string()));
        }
        self.queue.lock().unwrap().push_back(task.clone());
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Task>, QueueError> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.queue.lock().unwrap().len())
    }

    async fn mark_seen(&self, domain: &str) -> Result<bool, QueueError> {
        Ok(self.seen.lock().unwrap().insert(domain.to_string()))
    }

    async fn unmark_seen(&self, domain: &str) -> Result<(), QueueError> {
        self.seen.lock().unwrap().remove(domain);
        Ok(())
    }

    async fn seen_count(&self) -> Result<usize, QueueError> {
        Ok(self.seen.lock().unwrap().len())
    }
}

/// Result store keyed by domain, with a switch to simulate an outage
#[derive(Default)]
pub struct MemoryResults {
    records: Mutex<BTreeMap<String, OrganizationRecord>>,
    errors: Mutex<Vec<(String, String)>>,
    unavailable: AtomicBool,
}

impl MemoryResults {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn record(&self, domain: &str) -> Option<OrganizationRecord> {
        self.records.lock().unwrap().get(domain).cloned()
    }

    pub fn insert(&self, record: OrganizationRecord) {
        self.records.lock().unwrap().insert(record.domain.clone(), record);
    }

    /// (url, kind) pairs logged so far
    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ResultStore for MemoryResults {
    async fn upsert(&self, record: &OrganizationRecord) -> Result<(), StoreError> {
        self.check()?;
        self.insert(record.clone());
        Ok(())
    }

    async fn exists(&self, domain: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.records.lock().unwrap().contains_key(domain))
    }

    async fn log_error(&self, url: &str, kind: &str, _message: &str, _worker_id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.errors.lock().unwrap().push((url.to_string(), kind.to_string()));
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.records.lock().unwrap().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Tier;
    use chrono::Utc;

    fn record(domain: &str, score: f64) -> OrganizationRecord {
        OrganizationRecord {
            domain: domain.to_string(),
            url: format!("https://{}", domain),
            title: String::new(),
            description: String::new(),
            emails: vec![],
            phones: vec![],
            social: BTreeMap::new(),
            analysis: None,
            score,
            tier: Tier::D,
            niche: None,
            worker_id: "w0".to_string(),
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_record_per_domain() {
        let store = MemoryResults::default();
        store.upsert(&record("empresa.example", 2.0)).await.unwrap();
        store.upsert(&record("empresa.example", 7.5)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.record("empresa.example").unwrap().score, 7.5);
    }

    #[tokio::test]
    async fn test_mark_seen_reports_first_insert() {
        let frontier = MemoryFrontier::default();
        assert!(frontier.mark_seen("a.example").await.unwrap());
        assert!(!frontier.mark_seen("a.example").await.unwrap());
        assert_eq!(frontier.seen_count().await.unwrap(), 1);

        frontier.unmark_seen("a.example").await.unwrap();
        assert!(frontier.mark_seen("a.example").await.unwrap());
    }
}
