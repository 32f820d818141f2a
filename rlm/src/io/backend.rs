//! Model backend abstraction.
//!
//! The [`Backend`] trait decouples the session loop from the completion
//! endpoint. [`HttpBackend`] talks to an OpenAI-compatible
//! `/chat/completions` API; tests use scripted backends that replay canned
//! responses without network access.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::Message;
use crate::io::config::{BackendConfig, ModelProfile};

/// One completion request over a conversation.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub profile: &'a ModelProfile,
    pub messages: &'a [Message],
}

/// Abstraction over completion backends.
pub trait Backend {
    /// Complete the conversation, returning the assistant text.
    ///
    /// Implementations retry transient failures themselves; an `Err` means the
    /// call failed for good.
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        (**self).complete(request)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Backend for OpenAI-compatible chat completion endpoints.
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
    max_backoff: Duration,
}

impl HttpBackend {
    /// Build a backend from config, reading the API key from the configured env var.
    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(env = %cfg.api_key_env, "API key env var is not set");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(&cfg.base_url),
            api_key,
            max_retries: cfg.max_retries,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        })
    }

    fn send_once(&self, body: &ChatRequest<'_>) -> std::result::Result<String, CallError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .map_err(|err| CallError::Transient(anyhow!(err).context("send request")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            let text: String = text.chars().take(200).collect();
            let err = anyhow!("HTTP {status}: {text}");
            return Err(if is_retryable(status) {
                CallError::Transient(err)
            } else {
                CallError::Permanent(err)
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|err| CallError::Transient(anyhow!(err).context("parse response json")))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

enum CallError {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

impl Backend for HttpBackend {
    #[instrument(skip_all, fields(model = %request.profile.model, messages = request.messages.len()))]
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let body = ChatRequest {
            model: &request.profile.model,
            messages: request.messages,
            temperature: request.profile.temperature,
            max_tokens: request.profile.max_tokens,
        };

        let mut attempt = 0u32;
        loop {
            debug!(attempt, "completion request");
            match self.send_once(&body) {
                Ok(text) => return Ok(text),
                Err(CallError::Permanent(err)) => {
                    warn!(err = %err, "completion failed, not retrying");
                    return Err(err.context("completion request rejected"));
                }
                Err(CallError::Transient(err)) => {
                    if attempt >= self.max_retries {
                        warn!(attempt, err = %err, "completion failed, retries exhausted");
                        bail!(
                            "completion failed after {} attempts: {:#}",
                            attempt + 1,
                            err
                        );
                    }
                    let delay = backoff_delay(attempt, self.retry_backoff, self.max_backoff);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, err = %err, "completion failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// `{base_url}/chat/completions`, tolerating a trailing slash.
pub fn chat_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(max)
}

/// Server errors, timeouts and rate limits are worth retrying; other client errors are not.
pub fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}
