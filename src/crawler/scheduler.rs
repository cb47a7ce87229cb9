use std::collections::HashSet;
use tracing::{debug, warn};

use crate::cli::config::WorkerSettings;
use crate::crawler::task::Task;
use crate::error::QueueError;
use crate::storage::FrontierStore;
use crate::utils::domain::domain_key;

/// Decides which discovered links enter the frontier
pub struct Scheduler {
    /// Level-1 tasks spawned per seed page
    max_discovered: usize,
}

impl Scheduler {
    pub fn new(settings: &WorkerSettings) -> Self {
        Self {
            max_discovered: settings.max_discovered_links,
        }
    }

    /// Candidate level-1 tasks for a page, keyed by domain. Only seed tasks
    /// spawn discovery; at most one candidate per domain, never the
    /// parent's own domain.
    pub fn plan_discovery(&self, parent: &Task, external_links: &[String]) -> Vec<(String, Task)> {
        if !parent.is_seed() {
            return Vec::new();
        }

        let parent_domain = domain_key(&parent.url);
        let mut domains = HashSet::new();

        external_links
            .iter()
            .filter_map(|link| {
                let domain = domain_key(link)?;
                if Some(&domain) == parent_domain.as_ref() || !domains.insert(domain.clone()) {
                    return None;
                }
                Some((domain, parent.discovered(link.as_str())))
            })
            .take(self.max_discovered)
            .collect()
    }

    /// Enqueue the planned tasks whose domain is new to the dedup set.
    /// Returns how many were enqueued.
    pub async fn expand(
        &self,
        frontier: &dyn FrontierStore,
        parent: &Task,
        external_links: &[String],
    ) -> Result<usize, QueueError> {
        let mut enqueued = 0;

        for (domain, task) in self.plan_discovery(parent, external_links) {
            // Mark before pushing so a concurrent worker sees the domain as taken
            if !frontier.mark_seen(&domain).await? {
                debug!("Skipping already known domain: {}", domain);
                continue;
            }
            push_marked(frontier, &domain, &task).await?;
            enqueued += 1;
        }

        if enqueued > 0 {
            debug!("Enqueued {} discovered tasks from {}", enqueued, parent.url);
        }
        Ok(enqueued)
    }
}

/// Push a task whose domain was just marked. A failed push releases the
/// marker so a later run can enqueue the domain again.
async fn push_marked(frontier: &dyn FrontierStore, domain: &str, task: &Task) -> Result<(), QueueError> {
    let Err(e) = frontier.push(task).await else {
        return Ok(());
    };

    if let Err(unmark) = frontier.unmark_seen(domain).await {
        warn!("Domain {} stays marked without a queued task: {}", domain, unmark);
    }
    Err(e)
}

/// Outcome of loading seed tasks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub pushed: usize,
    /// Domains already in the dedup set
    pub known: usize,
    /// Rows without a usable URL
    pub invalid: usize,
}

/// Push seed tasks, marking each domain in the dedup set first
pub async fn ingest_seeds(frontier: &dyn FrontierStore, tasks: &[Task]) -> Result<SeedReport, QueueError> {
    let mut report = SeedReport::default();

    for task in tasks {
        let Some(domain) = domain_key(&task.url) else {
            warn!("Skipping seed without a host: {}", task.url);
            report.invalid += 1;
            continue;
        };
        if !frontier.mark_seen(&domain).await? {
            report.known += 1;
            continue;
        }
        push_marked(frontier, &domain, task).await?;
        report.pushed += 1;
    }

    Ok(report)
}
