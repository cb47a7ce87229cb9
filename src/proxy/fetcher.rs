use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cli::config::{FetchSettings, ProxySettings};
use crate::error::FetchError;
use crate::proxy::control::ControlClient;
use crate::utils::RetryPolicy;

/// Outbound page fetching with on-demand identity rotation
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a document, retrying transient failures
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Request a new network identity. Returns false when rotation failed;
    /// the current identity stays in use.
    async fn rotate_identity(&self) -> bool;

    /// Current public exit address, if it can be determined
    async fn exit_ip(&self) -> Option<String>;

    /// Drop the current session; the next fetch opens a new one
    async fn close(&self);
}

/// Fetcher routed through a local SOCKS proxy
pub struct AnonymizingFetcher {
    settings: FetchSettings,
    proxy: ProxySettings,
    retry: RetryPolicy,
    control: Option<ControlClient>,
    session: Mutex<Option<Client>>,
}

impl AnonymizingFetcher {
    pub fn new(settings: &FetchSettings, proxy: &ProxySettings) -> Self {
        let control = if proxy.enabled { Some(ControlClient::new(proxy)) } else { None };
        Self {
            settings: settings.clone(),
            proxy: proxy.clone(),
            retry: settings.retry.policy(),
            control,
            session: Mutex::new(None),
        }
    }

    fn build_client(&self) -> Result<Client, FetchError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .user_agent(&self.settings.user_agent)
            .cookie_store(true)
            .danger_accept_invalid_certs(self.settings.accept_invalid_certs);

        if self.proxy.enabled {
            let proxy = Proxy::all(&self.proxy.socks_url)
                .map_err(|e| FetchError::Client(format!("invalid proxy URL {}: {}", self.proxy.socks_url, e)))?;
            builder = builder.proxy(proxy);
        }

        builder.build().map_err(|e| FetchError::Client(e.to_string()))
    }

    /// Current session, created lazily
    async fn session(&self) -> Result<Client, FetchError> {
        let mut guard = self.session.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        debug!("Opening new outbound session");
        let client = self.build_client()?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn fetch_once(&self, url: &str, attempt: u32) -> Result<Vec<u8>, FetchError> {
        debug!("Fetching {} (attempt {})", url, attempt);
        let client = self.session().await?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus { url: url.to_string(), status: status.as_u16() });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl PageFetcher for AnonymizingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.retry
            .run(|attempt| self.fetch_once(url, attempt), FetchError::is_transient)
            .await
    }

    async fn rotate_identity(&self) -> bool {
        let Some(control) = &self.control else {
            debug!("Proxy disabled; identity rotation skipped");
            return false;
        };

        match control.new_identity().await {
            Ok(()) => {
                self.close().await;
                tokio::time::sleep(Duration::from_secs(self.proxy.identity_settle_secs)).await;
                info!("Network identity rotated");
                true
            }
            Err(e) => {
                warn!("Identity rotation failed, keeping current identity: {}", e);
                false
            }
        }
    }

    async fn exit_ip(&self) -> Option<String> {
        let client = self.session().await.ok()?;
        let response = match client.get(&self.proxy.ip_check_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Exit address check failed: {}", e);
                return None;
            }
        };
        let body: serde_json::Value = response.json().await.ok()?;
        body.get("IP").and_then(|ip| ip.as_str()).map(str::to_string)
    }

    async fn close(&self) {
        if self.session.lock().await.take().is_some() {
            debug!("Outbound session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::RetrySettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer) -> AnonymizingFetcher {
        let settings = FetchSettings {
            timeout_secs: 1,
            retry: RetrySettings { base_delay_ms: 0, jitter: false, ..RetrySettings::default() },
            ..FetchSettings::default()
        };
        let proxy = ProxySettings {
            enabled: false,
            ip_check_url: format!("{}/ip", server.uri()),
            ..ProxySettings::default()
        };
        AnonymizingFetcher::new(&settings, &proxy)
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let body = fetcher(&server).fetch(&server.uri()).await.unwrap();
        assert_eq!(body, b"<html>ok</html>");
    }

    #[tokio::test]
    async fn test_timeout_stops_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .expect(3)
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch(&format!("{}/slow", server.uri())).await;
        assert!(matches!(result, Err(FetchError::Timeout { .. })), "got {:?}", result);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch(&format!("{}/missing", server.uri())).await;
        assert!(matches!(result, Err(FetchError::HttpStatus { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .expect(1)
            .mount(&server)
            .await;

        let body = fetcher(&server).fetch(&server.uri()).await.unwrap();
        assert_eq!(body, b"recovered");
    }

    #[tokio::test]
    async fn test_exit_ip_and_rotation_without_proxy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"IP": "203.0.113.7"})))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server);
        assert_eq!(fetcher.exit_ip().await.as_deref(), Some("203.0.113.7"));
        assert!(!fetcher.rotate_identity().await);
    }
}
