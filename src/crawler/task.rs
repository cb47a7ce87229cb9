use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::analysis::{ClassificationResult, Tier};
use crate::utils::csv;

/// Discovery level of a seed task
pub const SEED_LEVEL: u8 = 0;

/// Discovery level of a task found on a seed page
pub const DISCOVERED_LEVEL: u8 = 1;

/// A unit of crawl work, immutable once enqueued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// URL to fetch
    pub url: String,

    /// Market niche the seed was collected for
    #[serde(default)]
    pub niche: Option<String>,

    /// Informational priority (higher = more urgent)
    #[serde(default)]
    pub priority: i32,

    /// 0 for seeds, 1 for discovered links
    #[serde(default)]
    pub level: u8,

    /// How many times this task has been re-enqueued after a failed fetch
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    /// Seed task as produced by seed ingestion
    pub fn seed(url: impl Into<String>, niche: Option<String>, priority: i32) -> Self {
        Self {
            url: url.into(),
            niche,
            priority,
            level: SEED_LEVEL,
            retry_count: 0,
        }
    }

    /// Level-1 task discovered on this task's page
    pub fn discovered(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            niche: self.niche.clone(),
            priority: self.priority.saturating_sub(1),
            level: DISCOVERED_LEVEL,
            retry_count: 0,
        }
    }

    /// Copy of this task for another attempt
    pub fn retried(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    pub fn is_seed(&self) -> bool {
        self.level == SEED_LEVEL
    }
}

/// Durable output unit, one current record per domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    /// Unique key
    pub domain: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub social: BTreeMap<String, String>,
    pub analysis: Option<ClassificationResult>,
    pub score: f64,
    pub tier: Tier,
    pub niche: Option<String>,
    pub worker_id: String,
    pub processed_at: DateTime<Utc>,
}

impl OrganizationRecord {
    /// Column names of the fallback log, in row order
    pub const CSV_HEADER: [&'static str; 13] = [
        "domain", "url", "title", "description", "emails", "phones", "social",
        "analysis", "score", "tier", "niche", "worker_id", "processed_at",
    ];

    /// One fallback-log row. Lists are `;`-joined, nested data is JSON.
    pub fn csv_row(&self) -> String {
        let social = serde_json::to_string(&self.social).unwrap_or_default();
        let analysis = self
            .analysis
            .as_ref()
            .and_then(|a| serde_json::to_string(a).ok())
            .unwrap_or_default();

        csv::write_row([
            self.domain.clone(),
            self.url.clone(),
            self.title.clone(),
            self.description.clone(),
            self.emails.join(";"),
            self.phones.join(";"),
            social,
            analysis,
            format!("{:.1}", self.score),
            self.tier.to_string(),
            self.niche.clone().unwrap_or_default(),
            self.worker_id.clone(),
            self.processed_at.to_rfc3339(),
        ])
    }

    pub fn csv_header() -> String {
        csv::write_row(Self::CSV_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults_when_fields_missing() {
        let task: Task = serde_json::from_str(r#"{"url": "https://empresa.example"}"#).unwrap();
        assert_eq!(task, Task::seed("https://empresa.example", None, 0));
        assert!(task.is_seed());
    }

    #[test]
    fn test_discovered_inherits_niche() {
        let seed = Task::seed("https://a.example", Some("turismo".to_string()), 5);
        let child = seed.discovered("https://b.example");

        assert_eq!(child.niche.as_deref(), Some("turismo"));
        assert_eq!(child.level, DISCOVERED_LEVEL);
        assert_eq!(child.priority, 4);
        assert!(!child.is_seed());
    }

    #[test]
    fn test_retried_increments_count_only() {
        let task = Task::seed("https://a.example", None, 1).retried().retried();
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.level, SEED_LEVEL);
        assert_eq!(task.url, "https://a.example");
    }

    #[test]
    fn test_csv_row_matches_header() {
        let record = OrganizationRecord {
            domain: "empresa.example".to_string(),
            url: "https://empresa.example".to_string(),
            title: "Empresa, S.L.".to_string(),
            description: String::new(),
            emails: vec!["a@empresa.example".to_string(), "b@empresa.example".to_string()],
            phones: vec![],
            social: BTreeMap::new(),
            analysis: None,
            score: 6.25,
            tier: Tier::B,
            niche: Some("ong".to_string()),
            worker_id: "local-0".to_string(),
            processed_at: Utc::now(),
        };

        let fields = csv::split_row(&record.csv_row());
        assert_eq!(fields.len(), OrganizationRecord::CSV_HEADER.len());
        assert_eq!(fields[2], "Empresa, S.L.");
        assert_eq!(fields[4], "a@empresa.example;b@empresa.example");
        assert_eq!(fields[9], "B");
    }
}
