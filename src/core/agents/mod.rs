mod data_analytics;
mod memory;

pub use data_analytics::DataAnalyticsClient;
pub use memory::InMemoryAgents;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::config::{AgentsBackend, AgentsConfig, WarehouseConfig};
use crate::core::warehouse::access_token_from_env;

/// What a conversational agent is grounded on and how it should behave.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    /// Requested short id, unique per project.
    pub agent_id: String,
    pub display_name: String,
    pub description: String,
    pub system_instruction: String,
    pub project_id: String,
    pub dataset_id: String,
    pub tables: Vec<String>,
}

/// Natural-language agents that answer questions over warehouse tables.
#[async_trait]
pub trait ConversationalAgents: Send + Sync {
    /// Returns the fully qualified agent name.
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String>;

    /// Ask the agent one question and return its text answer.
    async fn test_agent(&self, agent_name: &str, question: &str) -> Result<String>;
}

pub fn build_agents(
    cfg: &AgentsConfig,
    warehouse: &WarehouseConfig,
) -> Result<Arc<dyn ConversationalAgents>> {
    Ok(match cfg.backend {
        AgentsBackend::Memory => Arc::new(InMemoryAgents::new()),
        AgentsBackend::DataAnalytics => Arc::new(DataAnalyticsClient::new(
            access_token_from_env(&warehouse.access_token_env)?,
            cfg.base_url.clone(),
            cfg.location.clone(),
            Duration::from_secs(cfg.timeout_secs.max(1)),
        )?),
    })
}
