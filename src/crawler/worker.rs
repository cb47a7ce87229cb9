use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::analysis::{Classifier, Scorer, Tier};
use crate::cli::config::{CrawlerConfig, WorkerSettings};
use crate::crawler::scheduler::Scheduler;
use crate::crawler::task::{OrganizationRecord, Task};
use crate::error::{FetchError, QueueError};
use crate::extract::Extractor;
use crate::proxy::PageFetcher;
use crate::storage::{FallbackLog, FrontierStore, ResultStore};
use crate::utils::domain::domain_key;
use crate::utils::{RequestTimer, WorkerStats};

/// Longest error message written to the error log
const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// How one dequeued task ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The domain already has a current record
    Skipped,
    /// The task URL has no usable host
    Invalid,
    FetchFailed { requeued: bool },
    Completed {
        score: f64,
        tier: Tier,
        /// False when the record went to the fallback log
        persisted: bool,
        discovered: usize,
    },
}

/// Drains the shared queue, one task at a time, through the whole pipeline
pub struct Worker {
    id: String,
    settings: WorkerSettings,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Extractor,
    classifier: Classifier,
    scorer: Scorer,
    scheduler: Scheduler,
    frontier: Arc<dyn FrontierStore>,
    results: Arc<dyn ResultStore>,
    fallback: FallbackLog,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        id: String,
        config: &CrawlerConfig,
        fetcher: Arc<dyn PageFetcher>,
        classifier: Classifier,
        frontier: Arc<dyn FrontierStore>,
        results: Arc<dyn ResultStore>,
    ) -> Result<Self> {
        Ok(Self {
            fallback: FallbackLog::for_worker(&config.storage.backup_dir, &id),
            id,
            settings: config.worker.clone(),
            fetcher,
            extractor: Extractor::new(config.extractor.clone())?,
            classifier,
            scorer: Scorer::new(config.scoring.clone()),
            scheduler: Scheduler::new(&config.worker),
            frontier,
            results,
            stats: WorkerStats::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main loop. Cancellation is observed between tasks only, so the
    /// in-flight task always finishes.
    pub async fn run(self, token: CancellationToken) -> WorkerStats {
        let span = info_span!("worker", id = %self.id);
        self.run_loop(token).instrument(span).await
    }

    async fn run_loop(mut self, token: CancellationToken) -> WorkerStats {
        info!("Worker started (classification {})", if self.classifier.is_enabled() { "on" } else { "off" });

        match self.fetcher.exit_ip().await {
            Some(ip) => info!("Current exit address: {}", ip),
            None => warn!("Could not determine exit address"),
        }

        let idle = Duration::from_secs(self.settings.poll_interval_secs);

        while !token.is_cancelled() {
            match self.frontier.pop().await {
                Ok(Some(task)) => {
                    let outcome = self.process_task(task).await;
                    if matches!(outcome, TaskOutcome::Completed { .. }) {
                        self.maybe_rotate().await;
                    }
                }
                Ok(None) => {
                    debug!("Queue empty, sleeping {:?}", idle);
                    if sleep_or_cancel(&token, idle).await {
                        break;
                    }
                }
                Err(QueueError::Malformed(payload)) => {
                    warn!("Dropping malformed task: {}", payload);
                    self.stats.errored += 1;
                }
                Err(e) => {
                    error!("Frontier queue unavailable, worker cannot make progress: {}", e);
                    self.stats.errored += 1;
                    if sleep_or_cancel(&token, idle).await {
                        break;
                    }
                }
            }
        }

        self.fetcher.close().await;
        self.stats.tokens = self.classifier.total_tokens();

        info!(
            "Worker stopped. Processed: {}, skipped: {}, errors: {}, requeued: {}, fallback writes: {}, discovered: {}, rotations: {}, tokens: {}, {:.1} tasks/min",
            self.stats.processed,
            self.stats.skipped,
            self.stats.errored,
            self.stats.requeued,
            self.stats.fallback_writes,
            self.stats.discovered,
            self.stats.rotations,
            self.stats.tokens,
            self.stats.rate_per_minute()
        );

        self.stats
    }

    /// Drive one task through fetch, extract, classify, score, persist and
    /// discovery
    pub async fn process_task(&mut self, task: Task) -> TaskOutcome {
        let Some(domain) = domain_key(&task.url) else {
            warn!(url = %task.url, "Task URL has no host, dropping");
            self.stats.errored += 1;
            return TaskOutcome::Invalid;
        };

        match self.results.exists(&domain).await {
            Ok(true) => {
                debug!("Domain already recorded: {}", domain);
                self.stats.skipped += 1;
                return TaskOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => warn!("Existence check failed for {}, processing anyway: {}", domain, e),
        }

        info!(url = %task.url, level = task.level, "Processing");
        let timer = RequestTimer::start();

        let html = match self.fetcher.fetch(&task.url).await {
            Ok(html) => html,
            Err(e) => return self.handle_fetch_failure(&task, e).await,
        };
        self.stats.bytes_downloaded += html.len() as u64;

        let document = self.extractor.parse(&html, &task.url);
        let classification = self.classifier.classify(&document.text, &document.meta).await;
        let score = self.scorer.score(&document, &classification);
        let tier = Scorer::tier(score);
        let classified = classification.is_present();

        let record = OrganizationRecord {
            domain,
            url: task.url.clone(),
            title: document.meta.display_title().to_string(),
            description: document.meta.display_description().to_string(),
            emails: document.emails.clone(),
            phones: document.phones.clone(),
            social: document.social.clone(),
            analysis: classification.into_result(),
            score,
            tier,
            niche: task.niche.clone(),
            worker_id: self.id.clone(),
            processed_at: Utc::now(),
        };

        let persisted = self.persist(&record).await;

        let discovered = match self
            .scheduler
            .expand(self.frontier.as_ref(), &task, &document.external_links)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not enqueue discovered links from {}: {}", task.url, e);
                0
            }
        };
        self.stats.discovered += discovered as u64;
        self.stats.processed += 1;

        info!(
            url = %task.url,
            score,
            tier = %tier,
            contacts = document.has_contact(),
            classified,
            elapsed_ms = timer.end(),
            "Processed ({})",
            tier.description()
        );

        TaskOutcome::Completed { score, tier, persisted, discovered }
    }

    async fn handle_fetch_failure(&mut self, task: &Task, err: FetchError) -> TaskOutcome {
        error!(url = %task.url, error_type = err.kind(), "Fetch failed: {}", err);
        self.stats.errored += 1;

        let message: String = err.to_string().chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
        if let Err(e) = self.results.log_error(&task.url, err.kind(), &message, &self.id).await {
            warn!("Could not write error log entry: {}", e);
        }

        if !err.is_transient() || task.retry_count >= self.settings.max_task_retries {
            return TaskOutcome::FetchFailed { requeued: false };
        }

        match self.frontier.push(&task.retried()).await {
            Ok(()) => {
                debug!("Requeued {} (retry {})", task.url, task.retry_count + 1);
                self.stats.requeued += 1;
                TaskOutcome::FetchFailed { requeued: true }
            }
            Err(e) => {
                error!("Could not requeue {}: {}", task.url, e);
                TaskOutcome::FetchFailed { requeued: false }
            }
        }
    }

    /// Upsert the record, falling back to the local log
    async fn persist(&mut self, record: &OrganizationRecord) -> bool {
        let Err(e) = self.results.upsert(record).await else {
            return true;
        };

        warn!("Result store upsert failed for {}, writing fallback log: {}", record.domain, e);
        match self.fallback.append(record).await {
            Ok(()) => self.stats.fallback_writes += 1,
            Err(e) => error!("Record for {} lost, fallback log write failed: {:#}", record.domain, e),
        }
        false
    }

    async fn maybe_rotate(&mut self) {
        let every = self.settings.rotate_every.max(1);
        if self.stats.processed % every != 0 {
            return;
        }
        if self.fetcher.rotate_identity().await {
            self.stats.rotations += 1;
        }
    }
}

/// Sleep for `duration`; true if the token fired first
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
