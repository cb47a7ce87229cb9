use thiserror::Error;

/// Failure of a single page fetch, after retries
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection refused/reset, DNS, proxy handshake
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The request did not complete within the configured timeout
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// The server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// The outbound session could not be built (bad proxy URL, TLS setup)
    #[error("failed to build HTTP session: {0}")]
    Client(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            FetchError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            FetchError::Client(_) => false,
        }
    }

    /// Short machine-readable label used in logs and the error table
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "network",
            FetchError::Timeout { .. } => "timeout",
            FetchError::HttpStatus { .. } => "http_status",
            FetchError::Client(_) => "client",
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout { url: url.to_string() }
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus { url: url.to_string(), status: status.as_u16() }
        } else if err.is_builder() {
            FetchError::Client(err.to_string())
        } else {
            FetchError::Network { url: url.to_string(), message: err.to_string() }
        }
    }
}

/// Frontier store failures
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue service could not be reached or timed out
    #[error("frontier queue unavailable: {0}")]
    Unavailable(String),

    /// A queued payload could not be decoded into a Task
    #[error("malformed task payload: {0}")]
    Malformed(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

/// Result store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("result store unavailable: {0}")]
    Unavailable(String),

    #[error("result store query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Completion service failures for a single model call
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Timeout or connection error reaching the service
    #[error("completion transport error: {0}")]
    Transport(String),

    /// The service answered but rejected the request
    #[error("completion API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The service answered without any content; usage is still billed
    #[error("completion returned no content")]
    EmptyResponse { total_tokens: u64 },
}

impl CompletionError {
    pub fn is_transport(&self) -> bool {
        matches!(self, CompletionError::Transport(_))
    }

    /// Tokens the service reported for a failed call
    pub fn total_tokens(&self) -> u64 {
        match self {
            CompletionError::EmptyResponse { total_tokens } => *total_tokens,
            _ => 0,
        }
    }
}

/// Fatal configuration problems, reported before any work starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}` (set it in the config file or environment)")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
