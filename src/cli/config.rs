use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;
use tracing::{info, debug, error};

use crate::error::ConfigError;
use crate::utils::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CrawlerConfig {
    pub worker: WorkerSettings,
    pub proxy: ProxySettings,
    pub fetch: FetchSettings,
    pub extractor: ExtractorSettings,
    pub ai: AiSettings,
    pub scoring: ScoringSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Worker loop settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerSettings {
    /// Identifies this machine in records and logs
    pub machine_id: String,
    /// Number of workers started by `work`
    pub workers: usize,
    /// Sleep between polls of an empty queue, in seconds
    pub poll_interval_secs: u64,
    /// Rotate the network identity every N successfully processed tasks
    pub rotate_every: u64,
    /// External links turned into level-1 tasks per seed
    pub max_discovered_links: usize,
    /// Transient fetch failures are re-enqueued while retry_count is below this
    pub max_task_retries: u32,
    /// Seed CSV loaded by `work` when the queue is empty
    pub seed_file: Option<PathBuf>,
}

/// Anonymizing proxy settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    /// SOCKS endpoint used for all outbound traffic
    pub socks_url: String,
    /// Control channel address (host:port)
    pub control_addr: String,
    /// Password sent with AUTHENTICATE; empty means no password
    pub control_password: String,
    /// Time to wait after a NEWNYM signal, in seconds
    pub identity_settle_secs: u64,
    pub control_timeout_secs: u64,
    /// Endpoint answering `{"IP": "..."}` with the current exit address
    pub ip_check_url: String,
}

/// HTTP fetch settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Skip certificate validation. Many legacy and public-sector sites serve
    /// broken chains, so this is on by default.
    pub accept_invalid_certs: bool,
    pub retry: RetrySettings,
}

/// Exponential backoff settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

/// HTML extraction settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractorSettings {
    /// Character budget for the plain-text rendering
    pub max_text_chars: usize,
    pub max_internal_links: usize,
    pub max_external_links: usize,
    /// Hosts never worth crawling (social, CDN, analytics)
    pub blocked_domains: Vec<String>,
}

/// AI completion service settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AiSettings {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Candidate models, tried in order
    pub models: Vec<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Characters of page text included in the prompt
    pub prompt_text_chars: usize,
    /// Replaces the built-in system instructions when set
    pub system_prompt: Option<String>,
    pub retry: RetrySettings,
}

/// Lead scoring tables and weights
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringSettings {
    pub weights: ScoringWeights,
    pub high_priority_sectors: Vec<String>,
    pub medium_priority_sectors: Vec<String>,
    /// Multiplier per size bucket name
    pub size_multipliers: BTreeMap<String, f64>,
    /// Multiplier for an unrecognized size bucket
    pub default_size_multiplier: f64,
    /// Multiplier for a sector in neither priority set
    pub default_sector_multiplier: f64,
    pub priority_region_keywords: Vec<String>,
    pub secondary_region_keywords: Vec<String>,
    pub free_email_domains: Vec<String>,
}

/// Maximum contribution of each scoring factor
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringWeights {
    pub contact: f64,
    pub social: f64,
    pub professionalism: f64,
    pub size: f64,
    pub sector: f64,
    pub technology: f64,
    pub geography: f64,
    pub activity: f64,
}

/// Storage settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub queue: QueueSettings,
    pub results: ResultSettings,
    /// Directory for the local fallback log
    pub backup_dir: PathBuf,
}

/// Queue settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QueueSettings {
    pub redis_url: String,
    pub queue_key: String,
    pub seen_key: String,
    pub op_timeout_secs: u64,
}

/// Result store settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ResultSettings {
    pub database_url: String,
    pub table: String,
    pub error_table: String,
    pub max_connections: u32,
    pub op_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            machine_id: "local".to_string(),
            workers: 4,
            poll_interval_secs: 5,
            rotate_every: 10,
            max_discovered_links: 5,
            max_task_retries: 2,
            seed_file: None,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            socks_url: "socks5h://127.0.0.1:9050".to_string(),
            control_addr: "127.0.0.1:9051".to_string(),
            control_password: String::new(),
            identity_settle_secs: 5,
            control_timeout_secs: 10,
            ip_check_url: "https://check.torproject.org/api/ip".to_string(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            accept_invalid_certs: true,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            max_text_chars: 5000,
            max_internal_links: 50,
            max_external_links: 20,
            blocked_domains: [
                "facebook.com", "twitter.com", "x.com", "instagram.com", "linkedin.com",
                "youtube.com", "google.com", "googleapis.com", "gstatic.com",
                "googletagmanager.com", "google-analytics.com", "doubleclick.net",
                "cloudflare.com", "jsdelivr.net", "unpkg.com", "wa.me", "whatsapp.com",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            models: vec![
                "google/gemini-flash-1.5".to_string(),
                "deepseek/deepseek-chat".to_string(),
                "anthropic/claude-3-haiku".to_string(),
            ],
            timeout_secs: 60,
            max_tokens: 1000,
            temperature: 0.1,
            prompt_text_chars: 4000,
            system_prompt: None,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            contact: 1.0,
            social: 1.0,
            professionalism: 0.5,
            size: 1.5,
            sector: 1.0,
            technology: 0.5,
            geography: 2.5,
            activity: 2.0,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ScoringSettings {
    fn default() -> Self {
        let size_multipliers = [
            ("large", 1.0),
            ("medium", 0.8),
            ("small", 0.5),
            ("micro", 0.3),
            ("unknown", 0.4),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();

        Self {
            weights: ScoringWeights::default(),
            high_priority_sectors: strings(&[
                "government", "public administration", "institutional", "health",
                "education", "tourism", "culture", "associations", "foundations",
                "ngo", "construction", "energy", "technology",
                "gobierno", "administracion_publica", "institucional", "salud",
                "educacion", "turismo", "cultura", "asociaciones", "fundaciones",
                "ong", "construccion", "energia", "tecnologia",
            ]),
            medium_priority_sectors: strings(&[
                "retail", "services", "manufacturing", "real estate",
                "servicios", "manufactura", "inmobiliario",
            ]),
            size_multipliers,
            default_size_multiplier: 0.4,
            default_sector_multiplier: 0.2,
            priority_region_keywords: strings(&[
                "canarias", "tenerife", "gran canaria", "lanzarote", "fuerteventura",
                "la palma", "la gomera", "el hierro", "santa cruz", "las palmas",
            ]),
            secondary_region_keywords: strings(&[
                "españa", "espana", "spain", "madrid", "barcelona", "valencia",
                "sevilla", "bilbao",
            ]),
            free_email_domains: strings(&["gmail", "hotmail", "yahoo", "outlook"]),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            results: ResultSettings::default(),
            backup_dir: PathBuf::from("data/backup"),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            queue_key: "scraping_queue".to_string(),
            seen_key: "processed_domains".to_string(),
            op_timeout_secs: 10,
        }
    }
}

impl Default for ResultSettings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            table: "organizations".to_string(),
            error_table: "crawl_errors".to_string(),
            max_connections: 5,
            op_timeout_secs: 15,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            file: None,
        }
    }
}

impl CrawlerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "lead-crawler", "lead-crawler") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path
    }

    /// Path of the default configuration file
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("default.yaml")
    }

    /// Load configuration from an explicit path or the default location,
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_path();

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating {}", config_path.display());
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Overlay credentials and identity from the environment
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("REDIS_URL") {
            self.storage.queue.redis_url = url;
        }
        if let Some(url) = non_empty("DATABASE_URL") {
            self.storage.results.database_url = url;
        }
        if let Some(key) = non_empty("OPENROUTER_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(id) = non_empty("MACHINE_ID") {
            self.worker.machine_id = id;
        }
        if let Some(password) = non_empty("TOR_CONTROL_PASSWORD") {
            self.proxy.control_password = password;
        }
    }

    /// Reject configurations that cannot make progress
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.queue.redis_url.trim().is_empty() {
            return Err(ConfigError::Missing("storage.queue.redis_url"));
        }
        if self.storage.results.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("storage.results.database_url"));
        }
        if self.worker.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.worker.rotate_every == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.rotate_every",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.ai.enabled && self.ai.models.is_empty() {
            return Err(ConfigError::Invalid {
                field: "ai.models",
                reason: "at least one model is required when AI is enabled".to_string(),
            });
        }
        // Unrecognized sizes and sectors must still contribute something
        for (field, value) in [
            ("scoring.default_size_multiplier", self.scoring.default_size_multiplier),
            ("scoring.default_sector_multiplier", self.scoring.default_sector_multiplier),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be greater than zero, got {}", value),
                });
            }
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
