use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::client::{ChatMessage, CompletionClient, CompletionRequest, OpenRouterClient};
use crate::analysis::models::{Classification, ClassificationResult};
use crate::cli::config::AiSettings;
use crate::error::CompletionError;
use crate::extract::PageMeta;
use crate::utils::RetryPolicy;

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a business intelligence analyst profiling organizations from their public website.
Extract everything you can learn about the organization and answer with strict JSON using this schema:

{
  "organization_name": "Name as stated on the site",
  "main_activity": "What the organization actually does",
  "sector": "Short sector label, e.g. tourism, health, ngo, construction",
  "estimated_size": "large | medium | small | micro | unknown",
  "location": "City, island or region where it operates",
  "services": ["Services or projects offered"],
  "pain_points": ["Communication or management problems mentioned or implied"],
  "opportunities": ["Where external services could help"],
  "technologies": ["Software, platforms or tools detected"],
  "quality": {
    "professional_site": true,
    "has_contact_page": true,
    "has_press_room": false,
    "active_communication": false
  }
}

Answer ONLY with the JSON object."#;

/// How one model call ended
enum ModelOutcome {
    Parsed(ClassificationResult),
    /// The model answered but the output was not a usable classification
    Unusable(String),
    Transport(CompletionError),
}

/// Why a whole pass over the model list produced nothing
#[derive(Debug, Error)]
enum AttemptFailure {
    #[error("every model failed at transport level (last: {0})")]
    Transport(String),

    #[error("no model returned a usable classification")]
    NoUsableOutput,
}

/// Classifies page text through an ordered list of completion models
pub struct Classifier {
    client: Option<Arc<dyn CompletionClient>>,
    models: Vec<String>,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
    prompt_text_chars: usize,
    retry: RetryPolicy,
    tokens: AtomicU64,
}

impl Classifier {
    pub fn new(settings: &AiSettings, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client: Some(client),
            models: settings.models.clone(),
            system_prompt: settings
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            prompt_text_chars: settings.prompt_text_chars,
            retry: settings.retry.policy(),
            tokens: AtomicU64::new(0),
        }
    }

    /// Classifier that always reports an absent classification
    pub fn disabled() -> Self {
        Self {
            client: None,
            models: Vec::new(),
            system_prompt: String::new(),
            max_tokens: 0,
            temperature: 0.0,
            prompt_text_chars: 0,
            retry: RetryPolicy::none(),
            tokens: AtomicU64::new(0),
        }
    }

    /// Build a classifier backed by the configured service, or a disabled
    /// one when AI is turned off or no API key is available
    pub fn from_settings(settings: &AiSettings) -> Result<Self, CompletionError> {
        if !settings.enabled {
            info!("AI classification disabled by configuration");
            return Ok(Self::disabled());
        }
        match settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => {
                let client = OpenRouterClient::new(settings, key)?;
                Ok(Self::new(settings, Arc::new(client)))
            }
            None => {
                warn!("No completion API key configured; classification will be absent");
                Ok(Self::disabled())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Tokens consumed by every call made so far
    pub fn total_tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    /// Classify page text. Never fails: exhausted models yield `Absent`.
    pub async fn classify(&self, text: &str, meta: &PageMeta) -> Classification {
        let client = match &self.client {
            Some(client) => client.as_ref(),
            None => return Classification::Absent,
        };

        let messages = self.build_messages(text, meta);
        let outcome = self
            .retry
            .run(
                |attempt| self.attempt(client, &messages, attempt),
                |failure: &AttemptFailure| matches!(failure, AttemptFailure::Transport(_)),
            )
            .await;

        match outcome {
            Ok(result) => Classification::Present(result),
            Err(failure) => {
                warn!("Classification absent: {}", failure);
                Classification::Absent
            }
        }
    }

    /// One pass over the model list, stopping at the first usable answer
    async fn attempt(
        &self,
        client: &dyn CompletionClient,
        messages: &[ChatMessage],
        attempt: u32,
    ) -> Result<ClassificationResult, AttemptFailure> {
        let mut transport_failures = 0;
        let mut last_transport = String::new();

        for model in &self.models {
            match self.call_model(client, model, messages).await {
                ModelOutcome::Parsed(result) => {
                    info!("Classification succeeded with {} (attempt {})", model, attempt);
                    return Ok(result);
                }
                ModelOutcome::Unusable(reason) => {
                    warn!("Model {} returned unusable output: {}", model, reason);
                }
                ModelOutcome::Transport(err) => {
                    warn!("Model {} unreachable: {}", model, err);
                    transport_failures += 1;
                    last_transport = err.to_string();
                }
            }
        }

        if transport_failures > 0 && transport_failures == self.models.len() {
            Err(AttemptFailure::Transport(last_transport))
        } else {
            Err(AttemptFailure::NoUsableOutput)
        }
    }

    async fn call_model(
        &self,
        client: &dyn CompletionClient,
        model: &str,
        messages: &[ChatMessage],
    ) -> ModelOutcome {
        let request = CompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        match client.complete(&request).await {
            Ok(completion) => {
                self.tokens.fetch_add(completion.total_tokens, Ordering::Relaxed);
                match parse_response(&completion.content) {
                    Ok(result) => ModelOutcome::Parsed(result),
                    Err(e) => ModelOutcome::Unusable(e.to_string()),
                }
            }
            Err(err) if err.is_transport() => ModelOutcome::Transport(err),
            Err(err) => {
                self.tokens.fetch_add(err.total_tokens(), Ordering::Relaxed);
                ModelOutcome::Unusable(err.to_string())
            }
        }
    }

    fn build_messages(&self, text: &str, meta: &PageMeta) -> Vec<ChatMessage> {
        let title = non_empty_or(meta.display_title(), "(no title)");
        let description = non_empty_or(meta.display_description(), "(no description)");
        let body: String = text.chars().take(self.prompt_text_chars).collect();

        let user = format!(
            "Analyze this organization.\n\nTITLE: {}\nDESCRIPTION: {}\nKEYWORDS: {}\n\nWEBSITE CONTENT:\n{}\n\n\
             Pay special attention to where it is located, whether it has a press room or news section, \
             how active and professional its communication is, and communication pain points.",
            title, description, meta.keywords, body
        );
        debug!("Built classification prompt ({} chars)", user.len());

        vec![
            ChatMessage { role: "system", content: self.system_prompt.clone() },
            ChatMessage { role: "user", content: user },
        ]
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() { fallback } else { value }
}

/// Strip one layer of ``` fencing, if present
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_response(content: &str) -> Result<ClassificationResult, serde_json::Error> {
    let payload = strip_code_fence(content);
    // Reject anything that is not a JSON object before the lenient decode
    let value: serde_json::Value = serde_json::from_str(payload)?;
    if !value.is_object() {
        return Err(serde::de::Error::custom("expected a JSON object"));
    }
    serde_json::from_value(value)
}
