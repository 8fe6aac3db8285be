use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::llm::{CompletionRequest, LlmProvider, ProviderType, send_with_retry};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(
        client: Client,
        api_key: String,
        model: String,
        base_url: Option<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries,
            client,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let req = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            // The Messages API caps temperature at 1.0.
            temperature: request.temperature.min(1.0),
            system: request.system_instruction.as_deref(),
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };
        let url = format!("{}/v1/messages", self.base_url);

        let res = send_with_retry("Anthropic", self.max_retries, || {
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&req)
        })
        .await?;
        let parsed: MessagesResponse = res.json().await?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        if text.trim().is_empty() {
            return Err(anyhow!("Anthropic returned an empty completion"));
        }
        Ok(text)
    }
}
