use async_trait::async_trait;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use sqlx::types::Json;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::cli::config::ResultSettings;
use crate::crawler::task::OrganizationRecord;
use crate::error::StoreError;

/// Keyed store of finalized organization records
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the record for its domain
    async fn upsert(&self, record: &OrganizationRecord) -> Result<(), StoreError>;

    /// Whether a current record exists for the domain
    async fn exists(&self, domain: &str) -> Result<bool, StoreError>;

    /// Append to the error log
    async fn log_error(&self, url: &str, kind: &str, message: &str, worker_id: &str) -> Result<(), StoreError>;

    /// Number of stored records
    async fn count(&self) -> Result<u64, StoreError>;
}

/// PostgreSQL implementation of ResultStore
pub struct PostgresResultStore {
    /// PostgreSQL connection pool
    pool: Pool<Postgres>,

    table: String,
    error_table: String,
    op_timeout: Duration,
}

impl PostgresResultStore {
    /// Connect and make sure both tables exist
    pub async fn connect(settings: &ResultSettings) -> Result<Self, StoreError> {
        let op_timeout = Duration::from_secs(settings.op_timeout_secs.max(1));
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(op_timeout)
            .connect(&settings.database_url)
            .await?;

        let store = Self {
            pool,
            table: quote_ident(&settings.table),
            error_table: quote_ident(&settings.error_table),
            op_timeout,
        };

        store.ensure_tables().await?;
        debug!("Connected to PostgreSQL result store");

        Ok(store)
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Unavailable(format!(
                "operation timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    /// Ensure the record and error tables exist
    async fn ensure_tables(&self) -> Result<(), StoreError> {
        let records = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                domain TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                emails JSONB NOT NULL DEFAULT '[]',
                phones JSONB NOT NULL DEFAULT '[]',
                social JSONB NOT NULL DEFAULT '{{}}',
                analysis JSONB,
                score DOUBLE PRECISION NOT NULL,
                tier TEXT NOT NULL,
                niche TEXT,
                worker_id TEXT NOT NULL,
                processed_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            self.table
        );

        let errors = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                url TEXT NOT NULL,
                error_kind TEXT NOT NULL,
                message TEXT NOT NULL,
                worker_id TEXT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            self.error_table
        );

        self.bounded(sqlx::query(&records).execute(&self.pool)).await?;
        self.bounded(sqlx::query(&errors).execute(&self.pool)).await?;

        debug!("Ensured tables exist: {}, {}", self.table, self.error_table);
        Ok(())
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    async fn upsert(&self, record: &OrganizationRecord) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} (domain, url, title, description, emails, phones, social, analysis,
                             score, tier, niche, worker_id, processed_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
             ON CONFLICT (domain) DO UPDATE
             SET url = EXCLUDED.url,
                 title = EXCLUDED.title,
                 description = EXCLUDED.description,
                 emails = EXCLUDED.emails,
                 phones = EXCLUDED.phones,
                 social = EXCLUDED.social,
                 analysis = EXCLUDED.analysis,
                 score = EXCLUDED.score,
                 tier = EXCLUDED.tier,
                 niche = EXCLUDED.niche,
                 worker_id = EXCLUDED.worker_id,
                 processed_at = EXCLUDED.processed_at,
                 updated_at = NOW()",
            self.table
        );

        self.bounded(
            sqlx::query(&query)
                .bind(&record.domain)
                .bind(&record.url)
                .bind(&record.title)
                .bind(&record.description)
                .bind(Json(&record.emails))
                .bind(Json(&record.phones))
                .bind(Json(&record.social))
                .bind(record.analysis.as_ref().map(Json))
                .bind(record.score)
                .bind(record.tier.as_str())
                .bind(&record.niche)
                .bind(&record.worker_id)
                .bind(record.processed_at)
                .execute(&self.pool),
        )
        .await?;

        debug!("Upserted record for domain: {}", record.domain);
        Ok(())
    }

    async fn exists(&self, domain: &str) -> Result<bool, StoreError> {
        let query = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE domain = $1)", self.table);
        self.bounded(
            sqlx::query_scalar::<_, bool>(&query)
                .bind(domain)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn log_error(&self, url: &str, kind: &str, message: &str, worker_id: &str) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} (url, error_kind, message, worker_id) VALUES ($1, $2, $3, $4)",
            self.error_table
        );
        self.bounded(
            sqlx::query(&query)
                .bind(url)
                .bind(kind)
                .bind(message)
                .bind(worker_id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let query = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = self
            .bounded(sqlx::query_scalar(&query).fetch_one(&self.pool))
            .await?;
        Ok(count.max(0) as u64)
    }
}

/// Quote a configured table name as a SQL identifier
fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("organizations"), "\"organizations\"");
        assert_eq!(quote_ident("leads.organizations"), "\"leads\".\"organizations\"");
        assert_eq!(quote_ident("bad\"name"), "\"bad\"\"name\"");
    }
}
