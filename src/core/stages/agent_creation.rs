use std::sync::Arc;

use async_trait::async_trait;

use super::short_job_id;
use crate::core::agents::{AgentSpec, ConversationalAgents};
use crate::core::error::StageError;
use crate::core::job::{
    AgentIdentity, BusinessAnalysis, JobRecord, ProvisionedResources, SchemaDefinition, StageKind,
};
use crate::core::orchestrator::{StageContext, StageExecutor, StageOutput, require_output};

/// Registers a conversational agent over the provisioned tables and asks it
/// one smoke-test question.
pub struct AgentCreationStage {
    agents: Arc<dyn ConversationalAgents>,
}

impl AgentCreationStage {
    pub fn new(agents: Arc<dyn ConversationalAgents>) -> Self {
        Self { agents }
    }
}

fn agent_spec(
    job_id: &str,
    analysis: &BusinessAnalysis,
    schema: &SchemaDefinition,
    resources: &ProvisionedResources,
) -> AgentSpec {
    let mut instruction = format!(
        "You are a data analyst for {}, a company in {}. {}\n\
         Answer business questions using only the tables below and explain the numbers briefly.\n",
        analysis.company_name, analysis.industry, analysis.summary
    );
    for table in schema
        .tables
        .iter()
        .filter(|t| resources.tables.contains(&t.name))
    {
        let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        instruction.push_str(&format!(
            "- {}: {} ({})\n",
            table.name,
            table.description,
            columns.join(", ")
        ));
    }

    AgentSpec {
        agent_id: format!("demo-{}", short_job_id(job_id)),
        display_name: format!("{} demo analyst", analysis.company_name),
        description: format!("Conversational analytics demo for {}", analysis.company_name),
        system_instruction: instruction,
        project_id: resources.project_id.clone(),
        dataset_id: resources.dataset_id.clone(),
        tables: resources.tables.clone(),
    }
}

fn smoke_question(resources: &ProvisionedResources) -> String {
    match resources.tables.first() {
        Some(table) => format!("How many rows are in the {} table?", table),
        None => "Which tables can you answer questions about?".to_string(),
    }
}

#[async_trait]
impl StageExecutor for AgentCreationStage {
    fn kind(&self) -> StageKind {
        StageKind::AgentCreation
    }

    async fn execute(
        &self,
        record: &JobRecord,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let analysis = require_output(&record.outputs.business_analysis, "business analysis")?;
        let schema = require_output(&record.outputs.schema, "schema")?;
        let resources = require_output(&record.outputs.resources, "provisioned resources")?;

        let spec = agent_spec(&record.job_id, analysis, schema, resources);
        let agent_name = self.agents.create_agent(&spec).await?;
        ctx.info(format!("registered agent {}", agent_name)).await;

        let question = smoke_question(resources);
        let verified = match self.agents.test_agent(&agent_name, &question).await {
            Ok(answer) => {
                ctx.info(format!("smoke test answered: {}", answer.trim()))
                    .await;
                true
            }
            Err(e) => {
                ctx.warn(format!("smoke test failed: {:#}", e)).await;
                false
            }
        };

        Ok(StageOutput::AgentCreation(AgentIdentity {
            agent_id: agent_name,
            display_name: spec.display_name,
            verified,
        }))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};

    use super::*;
    use crate::core::agents::InMemoryAgents;
    use crate::core::job::{JobStore, LogLevel};
    use crate::core::testing::job_at_stage;

    /// Creates agents fine but never answers.
    struct MuteAgents(InMemoryAgents);

    #[async_trait]
    impl ConversationalAgents for MuteAgents {
        async fn create_agent(&self, spec: &AgentSpec) -> Result<String> {
            self.0.create_agent(spec).await
        }

        async fn test_agent(&self, _agent_name: &str, _question: &str) -> Result<String> {
            bail!("agent is still warming up")
        }
    }

    #[tokio::test]
    async fn creates_and_verifies_agent() {
        let store = JobStore::new();
        let record = job_at_stage(&store, StageKind::AgentCreation).await;
        let ctx = StageContext::new(&record.job_id, StageKind::AgentCreation, store.clone());
        let agents = Arc::new(InMemoryAgents::new());
        let stage = AgentCreationStage::new(agents.clone());

        let StageOutput::AgentCreation(agent) = stage.execute(&record, &ctx).await.unwrap() else {
            panic!("unexpected output");
        };
        assert!(agent.verified);
        assert_eq!(agent.display_name, "Acme Corp demo analyst");

        let spec = agents.get(&agent.agent_id).unwrap();
        let resources = record.outputs.resources.as_ref().unwrap();
        assert_eq!(spec.dataset_id, resources.dataset_id);
        assert_eq!(spec.tables, resources.tables);
        assert!(spec.agent_id.starts_with("demo-"));
        assert!(spec.system_instruction.contains("orders"));
    }

    #[tokio::test]
    async fn failed_smoke_test_is_a_warning() {
        let store = JobStore::new();
        let record = job_at_stage(&store, StageKind::AgentCreation).await;
        let ctx = StageContext::new(&record.job_id, StageKind::AgentCreation, store.clone());
        let stage = AgentCreationStage::new(Arc::new(MuteAgents(InMemoryAgents::new())));

        let StageOutput::AgentCreation(agent) = stage.execute(&record, &ctx).await.unwrap() else {
            panic!("unexpected output");
        };
        assert!(!agent.verified);
        let logs = store.get(&record.job_id).await.unwrap().logs;
        assert!(logs.iter().any(|l| l.level == LogLevel::Warning
            && l.message.contains("warming up")));
    }

    #[tokio::test]
    async fn requires_provisioned_resources() {
        let store = JobStore::new();
        let record = job_at_stage(&store, StageKind::Infrastructure).await;
        let ctx = StageContext::new(&record.job_id, StageKind::AgentCreation, store.clone());
        let stage = AgentCreationStage::new(Arc::new(InMemoryAgents::new()));
        let err = stage.execute(&record, &ctx).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput("provisioned resources")));
    }
}
