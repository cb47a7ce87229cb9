use anyhow::{Result, Context};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::analysis::Classifier;
use crate::cli::config::CrawlerConfig;
use crate::crawler::{ingest_seeds, SeedReport, Task, Worker};
use crate::proxy::AnonymizingFetcher;
use crate::storage::backup::pending_count;
use crate::storage::{FrontierStore, PostgresResultStore, RedisFrontier, ResultStore};
use crate::utils::csv::split_row;
use crate::utils::WorkerStats;

/// Run the worker pool until SIGINT/SIGTERM
pub async fn work(mut config: CrawlerConfig, workers: Option<usize>) -> Result<()> {
    if let Some(count) = workers {
        config.worker.workers = count;
    }
    config.validate()?;

    let frontier: Arc<dyn FrontierStore> = Arc::new(
        RedisFrontier::connect(&config.storage.queue)
            .await
            .context("Failed to connect to the frontier queue")?,
    );
    let results: Arc<dyn ResultStore> = Arc::new(
        PostgresResultStore::connect(&config.storage.results)
            .await
            .context("Failed to connect to the result store")?,
    );

    if let Some(seed_file) = &config.worker.seed_file {
        seed_from_file(frontier.as_ref(), seed_file, false).await?;
    }

    let token = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(token.clone()));

    let mut handles = Vec::with_capacity(config.worker.workers);
    for index in 0..config.worker.workers {
        let id = format!("{}-{}", config.worker.machine_id, index);
        let fetcher = Arc::new(AnonymizingFetcher::new(&config.fetch, &config.proxy));
        let classifier = Classifier::from_settings(&config.ai)
            .context("Failed to create the completion client")?;
        let worker = Worker::new(id, &config, fetcher, classifier, frontier.clone(), results.clone())?;

        info!("Starting worker {}", worker.id());
        handles.push(tokio::spawn(worker.run(token.clone())));
    }

    let mut total = WorkerStats::new();
    for outcome in join_all(handles).await {
        match outcome {
            Ok(stats) => total += &stats,
            Err(e) => error!("Worker task failed: {}", e),
        }
    }

    info!(
        "All workers stopped. Processed: {}, skipped: {}, errors: {}, fallback writes: {}, discovered: {}, tokens: {}",
        total.processed, total.skipped, total.errored, total.fallback_writes, total.discovered, total.tokens
    );

    Ok(())
}

/// Cancel the token on Ctrl-C or SIGTERM
async fn wait_for_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested, finishing in-flight tasks");
    token.cancel();
}

/// Push seed tasks from a CSV file
pub async fn seed(config: &CrawlerConfig, file: &Path, force: bool) -> Result<()> {
    let frontier = RedisFrontier::connect(&config.storage.queue)
        .await
        .context("Failed to connect to the frontier queue")?;

    match seed_from_file(&frontier, file, force).await? {
        Some(report) => println!(
            "Seeded {} tasks ({} already known, {} invalid rows)",
            report.pushed, report.known, report.invalid
        ),
        None => println!("Queue is not empty; use --force to seed anyway"),
    }

    Ok(())
}

/// Seed unless the queue already has work. `None` when skipped.
async fn seed_from_file(frontier: &dyn FrontierStore, file: &Path, force: bool) -> Result<Option<SeedReport>> {
    let queued = frontier.len().await?;
    if queued > 0 && !force {
        info!("Queue already holds {} tasks, seeding skipped", queued);
        return Ok(None);
    }

    let contents = tokio::fs::read_to_string(file)
        .await
        .context(format!("Failed to read seed file: {}", file.display()))?;
    let tasks = parse_seed_csv(&contents)
        .context(format!("Failed to parse seed file: {}", file.display()))?;

    let report = ingest_seeds(frontier, &tasks).await?;
    info!(
        "Loaded {} seed tasks from {} ({} already known, {} invalid)",
        report.pushed,
        file.display(),
        report.known,
        report.invalid
    );

    Ok(Some(report))
}

/// Parse seed rows. A header with a `url` column is required; `niche` and
/// `priority` (or their Spanish names) are optional.
pub fn parse_seed_csv(contents: &str) -> Result<Vec<Task>> {
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
    let header = lines.next().context("Seed file is empty")?;

    let columns: Vec<String> = split_row(header)
        .iter()
        .map(|c| c.trim().trim_start_matches('\u{feff}').to_lowercase())
        .collect();
    let find = |names: &[&str]| columns.iter().position(|c| names.contains(&c.as_str()));

    let url_col = find(&["url"]).context("Seed file has no `url` column")?;
    let niche_col = find(&["niche", "nicho"]);
    let priority_col = find(&["priority", "prioridad"]);

    let mut tasks = Vec::new();
    for line in lines {
        let fields = split_row(line);
        let field = |col: Option<usize>| col.and_then(|i| fields.get(i)).map(|f| f.trim());

        let url = field(Some(url_col)).unwrap_or_default();
        if url.is_empty() {
            warn!("Skipping seed row without URL: {}", line);
            continue;
        }
        let niche = field(niche_col).filter(|n| !n.is_empty()).map(str::to_string);
        let priority = field(priority_col).and_then(|p| p.parse().ok()).unwrap_or(1);

        tasks.push(Task::seed(url, niche, priority));
    }

    Ok(tasks)
}

/// Print queue, dedup and fallback counters
pub async fn status(config: &CrawlerConfig) -> Result<()> {
    let frontier = RedisFrontier::connect(&config.storage.queue)
        .await
        .context("Failed to connect to the frontier queue")?;

    let queued = frontier.len().await?;
    let seen = frontier.seen_count().await?;
    let pending = pending_count(&config.storage.backup_dir).await?;

    println!("Machine: {}", config.worker.machine_id);
    println!("Queued tasks: {}", queued);
    println!("Known domains: {}", seen);

    if config.storage.results.database_url.trim().is_empty() {
        println!("Stored records: (result store not configured)");
    } else {
        match PostgresResultStore::connect(&config.storage.results).await {
            Ok(store) => match store.count().await {
                Ok(count) => println!("Stored records: {}", count),
                Err(e) => println!("Stored records: unavailable ({})", e),
            },
            Err(e) => println!("Stored records: unavailable ({})", e),
        }
    }

    println!("Records waiting in fallback logs: {}", pending);
    if pending > 0 {
        println!("  (under {})", config.storage.backup_dir.display());
    }

    Ok(())
}

/// Print the effective configuration with secrets masked
pub fn show_config(config: &CrawlerConfig) -> Result<()> {
    let mut shown = config.clone();
    if shown.ai.api_key.is_some() {
        shown.ai.api_key = Some("********".to_string());
    }
    if !shown.proxy.control_password.is_empty() {
        shown.proxy.control_password = "********".to_string();
    }

    let yaml = serde_yaml::to_string(&shown).context("Failed to serialize configuration")?;
    println!("{}", yaml);
    Ok(())
}

/// Write a default configuration file
pub fn init_config(path: Option<&Path>) -> Result<()> {
    let path = path.map(PathBuf::from).unwrap_or_else(CrawlerConfig::default_path);
    if path.exists() {
        anyhow::bail!("Configuration file already exists: {}", path.display());
    }

    CrawlerConfig::default().save_to_file(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryFrontier;

    #[test]
    fn test_parse_seed_csv() {
        let csv = "url,nicho,prioridad\nhttps://a.example,turismo,3\n\nhttps://b.example,,\n,ong,1\n\"https://c.example\",\"salud, bienestar\",x\n";
        let tasks = parse_seed_csv(csv).unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0], Task::seed("https://a.example", Some("turismo".to_string()), 3));
        assert_eq!(tasks[1], Task::seed("https://b.example", None, 1));
        assert_eq!(tasks[2].niche.as_deref(), Some("salud, bienestar"));
        assert_eq!(tasks[2].priority, 1);
    }

    #[test]
    fn test_parse_seed_csv_requires_url_column() {
        assert!(parse_seed_csv("").is_err());
        assert!(parse_seed_csv("site,niche\nhttps://a.example,ong\n").is_err());
    }

    #[tokio::test]
    async fn test_seed_skipped_when_queue_has_work() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("seeds.csv");
        std::fs::write(&file, "url,niche,priority\nhttps://a.example,ong,1\n").unwrap();

        let frontier = MemoryFrontier::with_tasks([Task::seed("https://ya.example", None, 0)]);
        assert!(seed_from_file(&frontier, &file, false).await.unwrap().is_none());

        let report = seed_from_file(&frontier, &file, true).await.unwrap().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(frontier.len().await.unwrap(), 2);
    }

    #[test]
    fn test_init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        init_config(Some(&path)).unwrap();
        assert!(path.exists());
        assert!(init_config(Some(&path)).is_err());
    }
}
