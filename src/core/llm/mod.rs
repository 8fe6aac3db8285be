pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{info, warn};

use crate::core::config::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Google,
    Anthropic,
}

impl ProviderType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Some(ProviderType::Google),
            "anthropic" | "claude" => Some(ProviderType::Anthropic),
            _ => None,
        }
    }
}

/// A single-turn generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_instruction: Option<String>,
}

/// Sampling defaults the stages stamp onto every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            max_tokens: 8_192,
        }
    }
}

impl From<&LlmConfig> for GenerationSettings {
    fn from(cfg: &LlmConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        }
    }
}

impl GenerationSettings {
    pub fn request(&self, system: &str, prompt: impl Into<String>) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.into(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_instruction: Some(system.to_string()),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Build the provider named in `cfg`. The API key is read from the
/// environment variable `cfg.api_key_env`.
pub fn build_provider(cfg: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider_type = ProviderType::parse(&cfg.provider)
        .ok_or_else(|| anyhow!("Unknown LLM provider '{}'", cfg.provider))?;
    let api_key = std::env::var(&cfg.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| anyhow!("Environment variable {} is not set", cfg.api_key_env))?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
        .build()
        .context("Failed to build LLM HTTP client")?;

    let provider: Arc<dyn LlmProvider> = match provider_type {
        ProviderType::Google => Arc::new(providers::GoogleProvider::new(
            client,
            api_key,
            cfg.model.clone(),
            cfg.base_url.clone(),
            cfg.max_retries,
        )),
        ProviderType::Anthropic => Arc::new(providers::AnthropicProvider::new(
            client,
            api_key,
            cfg.model.clone(),
            cfg.base_url.clone(),
            cfg.max_retries,
        )),
    };
    info!(
        "Registered LLM Provider: {:?} ({})",
        provider.provider_type(),
        provider.model()
    );
    Ok(provider)
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500u64.saturating_mul(1 << attempt.min(6)))
}

/// Send a request, retrying 429s, 5xx responses and transport errors up to
/// `max_retries` times with exponential backoff. Non-retryable error statuses
/// are returned as errors carrying the response body.
pub(crate) async fn send_with_retry<F>(
    label: &str,
    max_retries: u32,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        match build().send().await {
            Ok(res) if res.status().is_success() => return Ok(res),
            Ok(res) if is_retryable(res.status()) && attempt < max_retries => {
                warn!(
                    "{} returned {}, retrying ({}/{})",
                    label,
                    res.status(),
                    attempt + 1,
                    max_retries
                );
            }
            Ok(res) => {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                bail!("{} API Error ({}): {}", label, status, body);
            }
            Err(e) if attempt < max_retries => {
                warn!(
                    "{} request failed: {}, retrying ({}/{})",
                    label,
                    e,
                    attempt + 1,
                    max_retries
                );
            }
            Err(e) => return Err(e).with_context(|| format!("{} request failed", label)),
        }
        tokio::time::sleep(backoff(attempt)).await;
        attempt += 1;
    }
}
