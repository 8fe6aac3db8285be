use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use super::{AgentSpec, ConversationalAgents};

/// Agents that live in process memory. Answers are canned but name the
/// tables the agent was grounded on, which is enough for local runs.
#[derive(Default)]
pub struct InMemoryAgents {
    agents: Mutex<HashMap<String, AgentSpec>>,
}

impl InMemoryAgents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, agent_name: &str) -> Option<AgentSpec> {
        self.agents.lock().ok()?.get(agent_name).cloned()
    }
}

#[async_trait]
impl ConversationalAgents for InMemoryAgents {
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String> {
        let name = format!("local/{}/agents/{}", spec.project_id, spec.agent_id);
        let mut agents = self
            .agents
            .lock()
            .map_err(|_| anyhow!("in-memory agent registry lock poisoned"))?;
        if agents.contains_key(&name) {
            bail!("Already Exists: agent {}", name);
        }
        agents.insert(name.clone(), spec.clone());
        Ok(name)
    }

    async fn test_agent(&self, agent_name: &str, question: &str) -> Result<String> {
        let spec = self
            .get(agent_name)
            .ok_or_else(|| anyhow!("Not found: agent {}", agent_name))?;
        Ok(format!(
            "{} can answer \"{}\" using {}.{} tables: {}",
            spec.display_name,
            question,
            spec.project_id,
            spec.dataset_id,
            spec.tables.join(", ")
        ))
    }
}
