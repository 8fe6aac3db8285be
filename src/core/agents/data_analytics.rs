use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{AgentSpec, ConversationalAgents};

pub const DEFAULT_BASE_URL: &str = "https://geminidataanalytics.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DataAgentResource<'a> {
    display_name: &'a str,
    description: &'a str,
    data_analytics_agent: AnalyticsAgent<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsAgent<'a> {
    published_context: PublishedContext<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishedContext<'a> {
    system_instruction: &'a str,
    datasource_references: DatasourceReferences<'a>,
}

#[derive(Serialize)]
struct DatasourceReferences<'a> {
    bq: BigQueryReferences<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BigQueryReferences<'a> {
    table_references: Vec<TableReference<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    data_agent_context: DataAgentContext<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessage<'a> {
    user_message: UserMessage<'a>,
}

#[derive(Serialize)]
struct UserMessage<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DataAgentContext<'a> {
    data_agent: &'a str,
}

/// Client for the Gemini Data Analytics (Conversational Analytics) API.
pub struct DataAnalyticsClient {
    client: Client,
    token: String,
    base_url: String,
    location: String,
}

impl DataAnalyticsClient {
    pub fn new(
        token: String,
        base_url: Option<String>,
        location: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Data Analytics HTTP client")?;
        Ok(Self {
            client,
            token,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            location,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Value> {
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            bail!("Data Analytics API Error ({}): {}", status, text);
        }
        Ok(res.json().await?)
    }
}

/// `projects/{p}/locations/{l}` of a fully qualified agent name.
fn parent_of(agent_name: &str) -> Option<&str> {
    let segments: Vec<&str> = agent_name.splitn(5, '/').collect();
    match segments.as_slice() {
        ["projects", _, "locations", _, rest] if rest.starts_with("dataAgents/") => {
            let parent_len = agent_name.len() - rest.len() - 1;
            Some(&agent_name[..parent_len])
        }
        _ => None,
    }
}

/// Collect every `systemMessage.text.parts` string from a chat reply, which
/// is either a single message object or an array of streamed messages.
fn answer_text(reply: &Value) -> String {
    let messages: Vec<&Value> = match reply {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut parts = Vec::new();
    for message in messages {
        if let Some(items) = message
            .pointer("/systemMessage/text/parts")
            .and_then(Value::as_array)
        {
            parts.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
        }
    }
    parts.join("")
}

#[async_trait]
impl ConversationalAgents for DataAnalyticsClient {
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String> {
        let parent = format!("projects/{}/locations/{}", spec.project_id, self.location);
        let body = DataAgentResource {
            display_name: &spec.display_name,
            description: &spec.description,
            data_analytics_agent: AnalyticsAgent {
                published_context: PublishedContext {
                    system_instruction: &spec.system_instruction,
                    datasource_references: DatasourceReferences {
                        bq: BigQueryReferences {
                            table_references: spec
                                .tables
                                .iter()
                                .map(|t| TableReference {
                                    project_id: &spec.project_id,
                                    dataset_id: &spec.dataset_id,
                                    table_id: t,
                                })
                                .collect(),
                        },
                    },
                },
            },
        };
        let url = format!(
            "{}/v1beta/{}/dataAgents?dataAgentId={}",
            self.base_url, parent, spec.agent_id
        );
        let operation = self.post(&url, &body).await?;
        if let Some(err) = operation.get("error") {
            bail!("Data agent creation failed: {}", err);
        }
        let name = format!("{}/dataAgents/{}", parent, spec.agent_id);
        debug!("Created data agent {}", name);
        Ok(name)
    }

    async fn test_agent(&self, agent_name: &str, question: &str) -> Result<String> {
        let parent = parent_of(agent_name)
            .ok_or_else(|| anyhow!("'{}' is not a data agent name", agent_name))?;
        let body = ChatRequest {
            messages: vec![ChatMessage {
                user_message: UserMessage { text: question },
            }],
            data_agent_context: DataAgentContext {
                data_agent: agent_name,
            },
        };
        let url = format!("{}/v1beta/{}:chat", self.base_url, parent);
        let reply = self.post(&url, &body).await?;
        let answer = answer_text(&reply);
        if answer.trim().is_empty() {
            bail!("Data agent {} returned no text answer", agent_name);
        }
        Ok(answer)
    }
}
