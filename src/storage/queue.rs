use async_trait::async_trait;
use redis::{Client, aio::MultiplexedConnection};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::cli::config::QueueSettings;
use crate::crawler::task::Task;
use crate::error::QueueError;

/// Shared FIFO of tasks plus the set of domains already enqueued or processed
#[async_trait]
pub trait FrontierStore: Send + Sync {
    /// Append a task to the tail of the queue
    async fn push(&self, task: &Task) -> Result<(), QueueError>;

    /// Pop the head of the queue, `None` when empty
    async fn pop(&self) -> Result<Option<Task>, QueueError>;

    /// Number of queued tasks
    async fn len(&self) -> Result<usize, QueueError>;

    /// Add a domain to the dedup set. Returns true if it was not there yet.
    async fn mark_seen(&self, domain: &str) -> Result<bool, QueueError>;

    /// Drop a domain from the dedup set
    async fn unmark_seen(&self, domain: &str) -> Result<(), QueueError>;

    /// Size of the dedup set
    async fn seen_count(&self) -> Result<usize, QueueError>;
}

/// Frontier held in Redis: a list for the queue and a set for dedup
pub struct RedisFrontier {
    /// Redis client
    client: Client,

    queue_key: String,
    seen_key: String,

    /// Bound on every round trip
    op_timeout: Duration,

    /// Cloned per command; clones share one multiplexed socket
    conn: MultiplexedConnection,
}

impl RedisFrontier {
    /// Connect to the configured Redis instance
    pub async fn connect(config: &QueueSettings) -> Result<Self, QueueError> {
        let client = Client::open(config.redis_url.clone())?;
        let op_timeout = Duration::from_secs(config.op_timeout_secs.max(1));

        let conn = tokio::time::timeout(op_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| QueueError::Unavailable(format!("timed out connecting to {}", config.redis_url)))??;

        debug!("Connected to frontier queue at {}", config.redis_url);

        Ok(Self {
            client,
            queue_key: config.queue_key.clone(),
            seen_key: config.seen_key.clone(),
            op_timeout,
            conn,
        })
    }

    /// Run one command with the operation timeout applied
    async fn bounded<T, F>(&self, op: F) -> Result<T, QueueError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result.map_err(QueueError::from),
            Err(_) => Err(QueueError::Unavailable(format!(
                "Redis operation timed out after {:?} ({:?})",
                self.op_timeout,
                self.client.get_connection_info().addr
            ))),
        }
    }
}

#[async_trait]
impl FrontierStore for RedisFrontier {
    async fn push(&self, task: &Task) -> Result<(), QueueError> {
        let task_json = serde_json::to_string(task)
            .map_err(|e| QueueError::Malformed(e.to_string()))?;

        let mut conn = self.conn.clone();
        self.bounded(
            redis::cmd("RPUSH")
                .arg(&self.queue_key)
                .arg(&task_json)
                .query_async::<_, ()>(&mut conn),
        )
        .await?;

        debug!("Pushed task to queue: {}", task.url);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Task>, QueueError> {
        let mut conn = self.conn.clone();
        let task_json: Option<String> = self
            .bounded(redis::cmd("LPOP").arg(&self.queue_key).query_async(&mut conn))
            .await?;

        match task_json {
            Some(task_json) => {
                let task: Task = serde_json::from_str(&task_json)
                    .map_err(|e| QueueError::Malformed(format!("{}: {}", e, task_json)))?;
                debug!("Popped task from queue: {}", task.url);
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        self.bounded(redis::cmd("LLEN").arg(&self.queue_key).query_async(&mut conn))
            .await
    }

    async fn mark_seen(&self, domain: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        // SADD answers the number of members actually added
        let added: i64 = self
            .bounded(
                redis::cmd("SADD")
                    .arg(&self.seen_key)
                    .arg(domain)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(added > 0)
    }

    async fn unmark_seen(&self, domain: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        self.bounded(
            redis::cmd("SREM")
                .arg(&self.seen_key)
                .arg(domain)
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn seen_count(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        self.bounded(redis::cmd("SCARD").arg(&self.seen_key).query_async(&mut conn))
            .await
    }
}
